//! Keep a working copy in sync with a remote branch and rerun a chain of
//! commands against it whenever the branch moves.

pub mod config;
pub mod error;
pub mod git_source;
pub mod process;
pub mod supervisor;
pub mod sync;
pub mod types;

pub use config::Config;
pub use error::Error;
pub use git_source::GitSource;
pub use process::{ProcessChain, ProcessSlot};
pub use supervisor::Supervisor;
pub use sync::SyncEngine;
