use serde::Deserialize;

use crate::error::SyncError;

// Result of one synchronization attempt, in the vocabulary used by the logs
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MergeOutcome {
    // Local branch already contains the remote tip
    UpToDate,

    // Branch reference moved to the remote tip, no commit created
    FastForwarded,

    // Diverged histories joined with a new two-parent commit
    Merged,

    // Three-way merge left unresolved conflicts in the index
    ConflictDetected,

    // The attempt failed before a merge could be classified or applied
    AnalysisError,
}

// How the local branch relates to its remote tracking branch
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Classification {
    UpToDate,
    FastForwardable,
    NormalMergeRequired,

    // Raw analysis bits for anything else (unborn, unrelated, ...)
    Unexpected(u32),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SyncReport {
    pub changed: bool,
    pub outcome: MergeOutcome,
}

impl SyncReport {
    pub fn unchanged(outcome: MergeOutcome) -> Self {
        SyncReport {
            changed: false,
            outcome,
        }
    }

    pub fn changed(outcome: MergeOutcome) -> Self {
        SyncReport {
            changed: true,
            outcome,
        }
    }
}

// What a single monitor tick observed
#[derive(Debug)]
pub enum TickOutcome {
    Unchanged(MergeOutcome),
    Changed(MergeOutcome),

    // The check itself failed; the running chain is left alone
    Failed(SyncError),
}

impl From<Result<SyncReport, SyncError>> for TickOutcome {
    fn from(result: Result<SyncReport, SyncError>) -> Self {
        match result {
            Ok(report) if report.changed => TickOutcome::Changed(report.outcome),
            Ok(report) => TickOutcome::Unchanged(report.outcome),
            Err(err) => TickOutcome::Failed(err),
        }
    }
}

// What to do when a command of the chain cannot be started
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartFailurePolicy {
    // Log the failure and continue with the next command
    #[default]
    Skip,

    // Log the failure and end the pass
    Abort,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProcessState {
    Running,

    // A termination signal was delivered to its process group
    Terminated,

    Exited,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ChainOutcome {
    // Every command ran to completion (or was skipped) without interruption
    Completed,

    // A restart was requested while the chain was running
    Interrupted,

    // The supervisor itself is shutting down
    Shutdown,

    // A command could not be started under the abort policy
    Aborted(String),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SupervisorState {
    Idle,
    Running,
    Restarting,
}
