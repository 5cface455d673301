use std::path::PathBuf;

use thiserror::Error;

use crate::types::MergeOutcome;

/// Errors raised while loading the settings document. All of them are fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to parse configuration file {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while establishing the working copy at startup.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("failed to clone {url} into {path}: {source}")]
    Clone {
        url: String,
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("failed to open repository at {0}: {1}")]
    Open(PathBuf, #[source] git2::Error),

    #[error("{0} exists but is not a git working copy")]
    NotAWorkingCopy(PathBuf),
}

/// Errors raised by a single synchronization attempt.
///
/// None of these are fatal: the supervisor logs them and treats the tick as
/// "no change".
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote not found: {0}")]
    RemoteNotFound(String, #[source] git2::Error),

    #[error("failed to fetch from remote {0}: {1}")]
    Fetch(String, #[source] git2::Error),

    #[error("local branch not found: {0}")]
    LocalBranchNotFound(String),

    #[error("remote branch not found: {0}")]
    RemoteBranchNotFound(String),

    #[error("merge conflict between {branch} and {upstream}; resolve it in the working copy")]
    ConflictDetected { branch: String, upstream: String },

    #[error("unexpected merge analysis result {0:#x}")]
    UnexpectedAnalysisResult(u32),

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
}

impl SyncError {
    /// Maps a failed attempt onto the merge outcome vocabulary.
    pub fn merge_outcome(&self) -> MergeOutcome {
        match self {
            SyncError::ConflictDetected { .. } => MergeOutcome::ConflictDetected,
            _ => MergeOutcome::AnalysisError,
        }
    }
}

/// Errors raised while starting, signaling or reaping child processes.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("command line is empty")]
    EmptyCommand,

    #[error("failed to start `{0}`: {1}")]
    Start(String, #[source] std::io::Error),

    #[error("failed to wait for `{0}`: {1}")]
    Wait(String, #[source] std::io::Error),

    #[error("failed to signal process group {0}: {1}")]
    Signal(i32, #[source] nix::Error),
}

/// Everything that can end the program with a non-zero status.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to install signal handlers: {0}")]
    SignalHandler(#[source] std::io::Error),

    #[error("command chain aborted: {0}")]
    ChainAborted(String),
}
