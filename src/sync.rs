use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::git_source::GitSource;
use crate::types::{SyncReport, TickOutcome};

/// Runs synchronization attempts for one tracked branch.
///
/// Owns the repository handle exclusively; only the monitor side of the
/// supervisor ever drives it, so attempts never overlap.
pub struct SyncEngine {
    source: GitSource,
    branch: String,
    attempts: u64,
}

impl SyncEngine {
    pub fn new(source: GitSource, branch: impl Into<String>) -> Self {
        SyncEngine {
            source,
            branch: branch.into(),
            attempts: 0,
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn source(&self) -> &GitSource {
        &self.source
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn sync(&mut self) -> Result<SyncReport, SyncError> {
        self.attempts += 1;
        let result = self.source.synchronize(&self.branch);

        match &result {
            Ok(report) if report.changed => info!(
                branch = %self.branch,
                outcome = ?report.outcome,
                "working copy updated"
            ),
            Ok(report) => debug!(
                branch = %self.branch,
                outcome = ?report.outcome,
                "working copy up to date"
            ),
            Err(err @ SyncError::ConflictDetected { .. }) => {
                warn!(branch = %self.branch, error = %err, "synchronization stopped on conflict")
            }
            Err(err) => error!(
                branch = %self.branch,
                attempt = self.attempts,
                error = %err,
                "synchronization failed"
            ),
        }

        result
    }

    /// One monitor tick: a sync attempt folded into an observable result.
    pub fn tick(&mut self) -> TickOutcome {
        self.sync().into()
    }
}
