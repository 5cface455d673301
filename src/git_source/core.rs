use std::fs;
use std::io;
use std::path::Path;

use git2::build::RepoBuilder;
use git2::{Config, Cred, CredentialType, ErrorCode, FetchOptions, RemoteCallbacks, Repository};
use tracing::{error, info};

use super::GitSource;
use crate::error::RepositoryError;

impl GitSource {
    /// Makes sure a working copy of `branch` exists at `path`.
    ///
    /// A missing (or empty) directory is cloned from `url`. An existing working
    /// copy is opened and caught up with one synchronization pass; a failure of
    /// that pass is logged and does not prevent the handle from being returned.
    pub fn ensure_local(
        path: &Path,
        url: &str,
        branch: &str,
        remote_name: &str,
    ) -> Result<Self, RepositoryError> {
        if needs_clone(path) {
            let source = GitSource::clone_remote(path, url, branch, remote_name)?;
            info!(
                url,
                branch,
                workdir = %source.workdir().display(),
                "cloned working copy"
            );
            return Ok(source);
        }

        let source = GitSource::open(path, remote_name)?;
        info!(workdir = %source.workdir().display(), "opened working copy");

        match source.synchronize(branch) {
            Ok(report) => info!(
                branch,
                changed = report.changed,
                outcome = ?report.outcome,
                "initial synchronization finished"
            ),
            Err(err) => error!(branch, error = %err, "initial synchronization failed"),
        }

        Ok(source)
    }

    pub fn clone_remote(
        path: &Path,
        url: &str,
        branch: &str,
        remote_name: &str,
    ) -> Result<Self, RepositoryError> {
        let remote = remote_name.to_string();
        let mut builder = RepoBuilder::new();
        builder
            .branch(branch)
            .fetch_options(fetch_options(Config::open_default().ok()))
            .remote_create(move |repo, _name, url| repo.remote(&remote, url));

        let repo = builder
            .clone(url, path)
            .map_err(|source| RepositoryError::Clone {
                url: url.to_string(),
                path: path.to_path_buf(),
                source,
            })?;

        Ok(GitSource {
            repo,
            remote_name: remote_name.to_string(),
        })
    }

    pub fn open(path: &Path, remote_name: &str) -> Result<Self, RepositoryError> {
        let repo =
            Repository::open(path).map_err(|e| RepositoryError::Open(path.to_path_buf(), e))?;

        if repo.is_bare() {
            return Err(RepositoryError::NotAWorkingCopy(path.to_path_buf()));
        }

        Ok(GitSource {
            repo,
            remote_name: remote_name.to_string(),
        })
    }

    pub fn workdir(&self) -> &Path {
        // open() rejects bare repositories and clones are never bare
        self.repo.workdir().unwrap_or_else(|| self.repo.path())
    }

    pub fn branch_tip(&self, branch: &str) -> Result<Option<git2::Oid>, git2::Error> {
        match self.repo.refname_to_id(&format!("refs/heads/{}", branch)) {
            Ok(oid) => Ok(Some(oid)),
            Err(ref e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn needs_clone(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(_) => false,
    }
}

/// Hands out each kind of credential at most once per transfer.
///
/// libgit2 calls the credentials callback again after every rejected
/// attempt, so returning the same credential would retry forever.
#[derive(Debug, Default)]
pub(crate) struct CredentialAttempts {
    ssh_agent: bool,
    helper: bool,
    default: bool,
}

impl CredentialAttempts {
    pub(crate) fn next(
        &mut self,
        config: Option<&Config>,
        url: &str,
        username_from_url: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, git2::Error> {
        if allowed.is_ssh_key() && !self.ssh_agent {
            if let Some(user) = username_from_url {
                self.ssh_agent = true;
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() && !self.helper {
            self.helper = true;
            if let Some(cfg) = config {
                if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        if !self.default {
            self.default = true;
            return Cred::default();
        }
        Err(git2::Error::from_str(&format!(
            "authentication failed for {}: no more credentials to try",
            url
        )))
    }
}

/// Fetch options with credential callbacks for SSH agents and credential helpers.
pub(crate) fn fetch_options<'a>(config: Option<Config>) -> FetchOptions<'a> {
    let mut attempts = CredentialAttempts::default();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts.next(config.as_ref(), url, username_from_url, allowed)
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}
