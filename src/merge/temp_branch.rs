//! Temporary branch for running fork merge requests through trusted CI
//!
//! Pipelines of a fork run with the fork's (untrusted) settings. When a temp
//! branch is configured, the fork's head is copied into that branch of the
//! target project and CI is polled there instead.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::merge::ci::short_sha;
use crate::merge::job::MergeJob;
use crate::merge::outcome::JobResult;
use crate::types::MergeRequest;

/// Time given to GitLab to start pipelines on a freshly created branch
pub const TEMP_BRANCH_SETTLE_DELAY: Duration = Duration::from_secs(30);

impl MergeJob<'_> {
    /// Point the temp branch at `commit_sha`, recreating it if needed
    pub async fn update_temp_branch(&self, mr: &MergeRequest, commit_sha: &str) -> JobResult<()> {
        let Some(temp_branch) = self.ctx.options.temp_branch.as_deref() else {
            return Ok(());
        };
        let platform = self.ctx.platform;
        let project_id = self.ctx.project.id;

        let head = platform.branch_head(project_id, temp_branch).await?;
        if head.as_deref() == Some(commit_sha) {
            debug!(mr_iid = mr.iid, branch = temp_branch, "temp branch already up to date");
            return Ok(());
        }

        info!(mr_iid = mr.iid, branch = temp_branch, sha = commit_sha, "setting up temp branch");
        self.delete_temp_branch(mr.source_project_id).await?;
        platform
            .create_branch(project_id, temp_branch, commit_sha)
            .await?;
        platform.protect_branch(project_id, temp_branch).await?;
        platform
            .comment(
                mr,
                &format!(
                    "The temporary branch **{temp_branch}** was updated to [{}](../commit/{commit_sha}) and local pipelines will be used.",
                    short_sha(commit_sha)
                ),
            )
            .await?;

        self.ctx.clock.sleep(TEMP_BRANCH_SETTLE_DELAY).await;
        Ok(())
    }

    /// Remove the temp branch if it was used for this merge request
    ///
    /// API refusals are ignored: the branch may already be gone.
    pub async fn delete_temp_branch(&self, source_project_id: u64) -> Result<()> {
        let Some(temp_branch) = self.ctx.options.temp_branch.as_deref() else {
            return Ok(());
        };
        let project_id = self.ctx.project.id;
        if source_project_id == project_id {
            return Ok(());
        }

        let platform = self.ctx.platform;
        ignore_api_error(platform.unprotect_branch(project_id, temp_branch).await)?;
        ignore_api_error(platform.delete_branch(project_id, temp_branch).await)?;
        Ok(())
    }
}

fn ignore_api_error(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::GitLabApi { status, message }) => {
            debug!(status, message = %message, "ignoring temp branch cleanup failure");
            Ok(())
        }
        other => other,
    }
}
