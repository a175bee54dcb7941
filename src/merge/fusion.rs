//! Publish pipeline: fuse, tag, push
//!
//! The checkpoints reached decide how a git failure is reported back to the
//! merge request.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::git::{GitResult, ORIGIN, SOURCE};
use crate::merge::job::MergeJob;
use crate::merge::outcome::{JobError, JobResult, JobState};
use crate::options::Fusion;
use crate::types::MergeRequest;

/// Time given to GitLab to register a push before we look at it again
pub const PUSH_SETTLE_DELAY: Duration = Duration::from_secs(30);

/// Commits produced by a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Target branch tip the source was fused onto
    pub target_sha: String,
    /// Source head right after the fusion
    pub updated_sha: String,
    /// Source head after trailers (equal to `updated_sha` without trailers)
    pub rewritten_sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Checkpoint {
    Start,
    Updated,
    Rewritten,
    Pushed,
}

fn git_failure_message(reached: Checkpoint, fusion: Fusion) -> Option<&'static str> {
    match (reached, fusion) {
        (Checkpoint::Start, Fusion::Rebase) => {
            Some("Got conflicts while rebasing, your problem now...")
        }
        (Checkpoint::Start, Fusion::Merge) => {
            Some("Got conflicts while merging, your problem now...")
        }
        (Checkpoint::Updated, _) => Some("Failed on filter-branch; check my logs!"),
        (Checkpoint::Rewritten, Fusion::Rebase) => {
            Some("Failed to push rebased changes, check my logs!")
        }
        (Checkpoint::Rewritten, Fusion::Merge) => {
            Some("Failed to push merged changes, check my logs!")
        }
        (Checkpoint::Pushed, _) => None,
    }
}

impl MergeJob<'_> {
    /// Rebase or merge `source` onto `origin/<target>` with the configured
    /// strategy. Leaves `source` checked out.
    pub fn fuse(
        &self,
        source: &str,
        target: &str,
        source_repo_url: Option<&str>,
        local: bool,
    ) -> GitResult<String> {
        let repo = self.ctx.repo;
        match self.ctx.options.fusion {
            Fusion::Rebase => repo.rebase(source, target, source_repo_url, local),
            Fusion::Merge => repo.merge(source, target, source_repo_url, local),
        }
    }

    /// Bring the source branch up to date with its target, add trailers and
    /// force-push the result.
    ///
    /// The local source branch is removed afterwards whatever happened.
    pub async fn update_from_target_branch_and_push(
        &self,
        mr: &MergeRequest,
        source_repo_url: Option<&str>,
    ) -> JobResult<Published> {
        let repo = self.ctx.repo;
        debug_assert!(source_repo_url != Some(repo.remote_url()));
        if source_repo_url.is_none() && mr.source_branch == mr.target_branch {
            return Err(JobError::cannot_merge(
                "Source and target branch seem to coincide!",
            ));
        }

        let mut reached = Checkpoint::Start;
        let result = self.publish(mr, source_repo_url, &mut reached).await;

        let result = result.map_err(|err| match err {
            JobError::Tooling(crate::error::Error::Git(git_err)) => {
                match git_failure_message(reached, self.ctx.options.fusion) {
                    Some(message) => {
                        warn!(mr_iid = mr.iid, error = %git_err, ?reached, "git failed during publish");
                        JobError::cannot_merge(message)
                    }
                    None => git_err.into(),
                }
            }
            other => other,
        });

        let cleanup = self.remove_local_source_branch(mr, source_repo_url);
        match (result, cleanup) {
            (Ok(published), Ok(())) => Ok(published),
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err.into()),
            (Err(err), Err(cleanup_err)) => {
                warn!(mr_iid = mr.iid, error = %cleanup_err, "cleanup after failed publish also failed");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
        }
    }

    async fn publish(
        &self,
        mr: &MergeRequest,
        source_repo_url: Option<&str>,
        reached: &mut Checkpoint,
    ) -> JobResult<Published> {
        let repo = self.ctx.repo;
        let source = &mr.source_branch;
        let target = &mr.target_branch;

        let updated_sha = self.fuse(source, target, source_repo_url, false)?;
        *reached = Checkpoint::Updated;
        self.transition(mr, JobState::Fused);

        // fuse fetched origin, so its view of the target is current
        let target_sha = repo.get_commit_hash(&format!("{ORIGIN}/{target}"))?;
        if updated_sha == target_sha {
            return Err(JobError::cannot_merge(format!(
                "These changes already exist in branch `{target}`."
            )));
        }

        let rewritten_sha = self
            .add_trailers(mr)
            .await?
            .unwrap_or_else(|| updated_sha.clone());
        *reached = Checkpoint::Rewritten;
        self.transition(mr, JobState::TrailersApplied);

        let remote = if mr.is_from_fork() { SOURCE } else { ORIGIN };
        let source_sha = repo.get_commit_hash(&format!("{remote}/{source}"))?;
        if rewritten_sha == source_sha {
            info!(mr_iid = mr.iid, sha = %rewritten_sha, "source branch already up to date");
        } else {
            repo.push(source, source_repo_url, true, Some("ci.skip"))?;
            self.ctx.clock.sleep(PUSH_SETTLE_DELAY).await;
        }
        *reached = Checkpoint::Pushed;
        self.transition(mr, JobState::Pushed);

        Ok(Published {
            target_sha,
            updated_sha,
            rewritten_sha,
        })
    }

    fn remove_local_source_branch(
        &self,
        mr: &MergeRequest,
        source_repo_url: Option<&str>,
    ) -> GitResult<()> {
        let repo = self.ctx.repo;
        if mr.source_branch != repo.default_branch() {
            return repo.remove_branch(&mr.source_branch);
        }
        // only a fork may propose its default branch
        if source_repo_url.is_none() {
            error!(
                mr_iid = mr.iid,
                branch = %mr.source_branch,
                "source branch is the default branch of our own clone"
            );
            debug_assert!(source_repo_url.is_some());
        }
        Ok(())
    }
}
