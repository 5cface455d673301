use git2::Repository;

/// An opened working copy together with the remote it follows.
///
/// The handle is opened once at startup and reused by every synchronization
/// attempt for the rest of the process lifetime.
pub struct GitSource {
    pub repo: Repository,
    pub remote_name: String,
}

// Re-export impl blocks
mod core;
mod merge;

pub use merge::classify;
