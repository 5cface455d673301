use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::types::StartFailurePolicy;

/// Settings document, read once at startup.
///
/// Field names follow the historical `conf.json` layout, so `Cmd` and
/// `Directory` are accepted as well as their lowercase spellings.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Command lines run in order on every pass.
    #[serde(alias = "Cmd")]
    pub cmd: Vec<String>,

    /// Clone source, only consulted when the working copy is missing.
    #[serde(default)]
    pub git_repo: String,

    pub git_branch: String,

    /// Working copy location, also the working directory of every command.
    #[serde(alias = "Directory")]
    pub directory: PathBuf,

    pub period_in_seconds: u64,

    #[serde(default = "default_remote")]
    pub remote: String,

    /// Line written to each command's stdin before it is closed.
    #[serde(default = "default_stdin_line")]
    pub stdin_line: String,

    #[serde(default)]
    pub on_start_failure: StartFailurePolicy,

    /// Grace period after SIGTERM before the process group is killed.
    #[serde(default)]
    pub kill_after_seconds: Option<u64>,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_stdin_line() -> String {
    "4".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cmd.is_empty() {
            return Err(ConfigError::Invalid(
                "`cmd` must list at least one command".to_string(),
            ));
        }
        if let Some(index) = self.cmd.iter().position(|line| line.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "`cmd` entry {} is empty",
                index
            )));
        }
        if self.git_branch.trim().is_empty() {
            return Err(ConfigError::Invalid("`git_branch` must not be empty".to_string()));
        }
        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("`directory` must not be empty".to_string()));
        }
        if self.period_in_seconds == 0 {
            return Err(ConfigError::Invalid(
                "`period_in_seconds` must be greater than zero".to_string(),
            ));
        }
        if self.remote.trim().is_empty() {
            return Err(ConfigError::Invalid("`remote` must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.period_in_seconds)
    }

    pub fn kill_after(&self) -> Option<Duration> {
        self.kill_after_seconds.map(Duration::from_secs)
    }
}
