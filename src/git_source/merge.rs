use git2::build::CheckoutBuilder;
use git2::{
    AnnotatedCommit, ErrorCode, MergeAnalysis, Oid, Reference, RepositoryState, Signature,
};
use tracing::debug;

use super::core::fetch_options;
use super::GitSource;
use crate::error::SyncError;
use crate::types::*;

/// Reduces libgit2's analysis bits to a single classification.
///
/// libgit2 sets NORMAL together with FASTFORWARD when a fast-forward is
/// possible, so FASTFORWARD is checked first.
pub fn classify(analysis: MergeAnalysis) -> Classification {
    if analysis.is_up_to_date() {
        Classification::UpToDate
    } else if analysis.is_fast_forward() {
        Classification::FastForwardable
    } else if analysis.is_normal() {
        Classification::NormalMergeRequired
    } else {
        Classification::Unexpected(analysis.bits())
    }
}

impl GitSource {
    /// Fetches the remote and brings `branch` up to date with its remote
    /// tracking branch.
    pub fn synchronize(&self, branch: &str) -> Result<SyncReport, SyncError> {
        let local_ref_name = format!("refs/heads/{}", branch);
        let upstream = format!("{}/{}", self.remote_name, branch);

        // Never merge over a conflict somebody still has to resolve
        if self.has_unresolved_conflicts()? {
            return Err(SyncError::ConflictDetected {
                branch: branch.to_string(),
                upstream,
            });
        }

        self.fetch()?;

        let remote_ref = match self.repo.find_reference(&format!("refs/remotes/{}", upstream)) {
            Ok(reference) => reference,
            Err(ref e) if e.code() == ErrorCode::NotFound => {
                return Err(SyncError::RemoteBranchNotFound(upstream));
            }
            Err(e) => return Err(e.into()),
        };
        let remote_oid = remote_ref.peel_to_commit()?.id();
        let remote_commit = self.repo.reference_to_annotated_commit(&remote_ref)?;

        let local_ref = match self.repo.find_reference(&local_ref_name) {
            Ok(reference) => reference,
            Err(ref e) if e.code() == ErrorCode::NotFound => {
                return Err(SyncError::LocalBranchNotFound(branch.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let local_oid = local_ref.peel_to_commit()?.id();

        let (analysis, _preference) = self
            .repo
            .merge_analysis_for_ref(&local_ref, &[&remote_commit])?;

        debug!(
            branch,
            local = %local_oid,
            remote = %remote_oid,
            analysis = analysis.bits(),
            "merge analysis"
        );

        match classify(analysis) {
            Classification::UpToDate => Ok(SyncReport::unchanged(MergeOutcome::UpToDate)),
            Classification::FastForwardable => {
                self.fast_forward(local_ref, remote_oid)?;
                Ok(SyncReport::changed(MergeOutcome::FastForwarded))
            }
            Classification::NormalMergeRequired => {
                self.merge_remote(branch, &upstream, local_oid, &remote_commit)?;
                Ok(SyncReport::changed(MergeOutcome::Merged))
            }
            Classification::Unexpected(bits) => Err(SyncError::UnexpectedAnalysisResult(bits)),
        }
    }

    /// True when a previous merge stopped with conflicts that are still in the index.
    pub fn has_unresolved_conflicts(&self) -> Result<bool, git2::Error> {
        if self.repo.state() != RepositoryState::Merge {
            return Ok(false);
        }
        Ok(self.repo.index()?.has_conflicts())
    }

    fn fetch(&self) -> Result<(), SyncError> {
        let mut remote = self
            .repo
            .find_remote(&self.remote_name)
            .map_err(|e| SyncError::RemoteNotFound(self.remote_name.clone(), e))?;

        // An empty refspec list fetches with the remote's configured refspecs
        let mut options = fetch_options(self.repo.config().ok());
        remote
            .fetch::<&str>(&[], Some(&mut options), None)
            .map_err(|e| SyncError::Fetch(self.remote_name.clone(), e))
    }

    fn fast_forward(&self, mut local_ref: Reference, target: Oid) -> Result<(), SyncError> {
        let commit = self.repo.find_commit(target)?;

        // update the working tree first, relative to the current HEAD
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))?;

        let ref_name = local_ref
            .name()
            .map(str::to_string)
            .ok_or_else(|| git2::Error::from_str("branch reference name is not valid UTF-8"))?;
        local_ref.set_target(target, &format!("autopull: fast-forward to {}", target))?;
        self.repo.set_head(&ref_name)?;

        Ok(())
    }

    fn merge_remote(
        &self,
        branch: &str,
        upstream: &str,
        local_oid: Oid,
        remote_commit: &AnnotatedCommit,
    ) -> Result<(), SyncError> {
        self.attach_head(branch)?;

        self.repo.merge(&[remote_commit], None, None)?;

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            // leave the merge in progress for manual resolution
            return Err(SyncError::ConflictDetected {
                branch: branch.to_string(),
                upstream: upstream.to_string(),
            });
        }

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let local = self.repo.find_commit(local_oid)?;
        let remote = self.repo.find_commit(remote_commit.id())?;
        let signature = self.signature()?;

        self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &format!("Merge remote-tracking branch '{}'", upstream),
            &tree,
            &[&local, &remote],
        )?;

        self.repo.cleanup_state()?;

        Ok(())
    }

    /// Points HEAD at the tracked branch so merges land on it.
    fn attach_head(&self, branch: &str) -> Result<(), git2::Error> {
        let ref_name = format!("refs/heads/{}", branch);
        let on_branch = match self.repo.head() {
            Ok(head) => head.name() == Some(ref_name.as_str()),
            Err(_) => false,
        };
        if on_branch {
            return Ok(());
        }

        let (object, _reference) = self.repo.revparse_ext(&ref_name)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo.checkout_tree(&object, Some(&mut checkout))?;
        self.repo.set_head(&ref_name)
    }

    fn signature(&self) -> Result<Signature<'static>, git2::Error> {
        match self.repo.signature() {
            Ok(signature) => Ok(signature),
            Err(_) => Signature::now("autopull", "autopull@localhost"),
        }
    }
}
