//! CI poller
//!
//! Finds the pipeline that ran on a given commit, reads its status and,
//! when configured, triggers a new pipeline if there is none worth waiting
//! for.

use std::cmp::Reverse;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::merge::job::MergeJob;
use crate::merge::outcome::{JobError, JobResult};
use crate::types::{MergeRequest, Pipeline, PipelineJob, PipelineStatus};

/// Poll interval while waiting for CI
pub const CI_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Merge request pipelines first, then newest first
pub fn sort_pipelines(pipelines: &mut [Pipeline]) {
    pipelines.sort_by_key(|p| (!p.is_merge_request_pipeline(), Reverse(p.id)));
}

/// Whether any job name matches `job_regexp` at its start
pub fn has_required_job(jobs: &[PipelineJob], job_regexp: &Regex) -> bool {
    jobs.iter()
        .any(|job| job_regexp.find(&job.name).is_some_and(|m| m.start() == 0))
}

/// Comment fragment proving we already triggered a pipeline for `sha`
pub fn trigger_marker(sha: &str) -> String {
    format!("I created a new pipeline for [{}]", short_sha(sha))
}

pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

impl MergeJob<'_> {
    /// Status of the pipeline that ran on `commit_sha`
    ///
    /// `None` means there is no such pipeline yet (or one was just
    /// triggered). Fails if the branch moved away from `commit_sha`.
    pub async fn get_mr_ci_status(
        &self,
        mr: &MergeRequest,
        commit_sha: &str,
    ) -> JobResult<Option<PipelineStatus>> {
        let platform = self.ctx.platform;
        let options = self.ctx.options;

        let mr = platform.refetch(mr).await?;
        if mr.sha != commit_sha {
            return Err(JobError::cannot_merge(
                "Someone pushed to branch while I was waiting for CI to pass.",
            ));
        }

        let (project_id, branch) = match &options.temp_branch {
            Some(temp_branch) if mr.is_from_fork() => {
                self.update_temp_branch(&mr, commit_sha).await?;
                (self.ctx.project.id, temp_branch.clone())
            }
            _ => (mr.source_project_id, mr.source_branch.clone()),
        };

        let mr_ref = mr.pipeline_ref();
        let mut pipelines = platform
            .pipelines_by_branch(project_id, &branch, Some(&mr_ref), None)
            .await?;
        sort_pipelines(&mut pipelines);
        if pipelines.first().is_none_or(|p| p.sha != commit_sha) {
            warn!(mr_iid = mr.iid, sha = commit_sha, "no merge request pipeline for commit");
            pipelines = platform
                .pipelines_by_branch(project_id, &branch, None, None)
                .await?;
            sort_pipelines(&mut pipelines);
        }

        let mut status = None;
        let mut trigger = false;
        let mut message = String::new();
        match pipelines.into_iter().next().filter(|p| p.sha == commit_sha) {
            Some(pipeline) => {
                debug!(mr_iid = mr.iid, pipeline_id = pipeline.id, status = %pipeline.status, "found pipeline");
                let jobs = platform.pipeline_jobs(&pipeline).await?;
                if !has_required_job(&jobs, &options.job_regexp) {
                    message = "CI doesn't contain the required jobs.".to_string();
                    if !options.create_pipeline {
                        return Err(JobError::cannot_merge(message));
                    }
                    warn!(mr_iid = mr.iid, pipeline_id = pipeline.id, "pipeline lacks required jobs");
                    trigger = true;
                }
                status = Some(pipeline.status);
            }
            None => {
                message = format!("No pipeline listed for {commit_sha} on branch {branch}.");
                warn!(mr_iid = mr.iid, sha = commit_sha, branch = %branch, "no pipeline for commit");
                trigger = options.create_pipeline;
            }
        }

        if trigger {
            self.trigger_pipeline(&mr, project_id, &branch, commit_sha, &message)
                .await?;
            status = None;
        }

        Ok(status)
    }

    /// Create a pipeline for `branch`, at most once per commit
    pub async fn trigger_pipeline(
        &self,
        mr: &MergeRequest,
        project_id: u64,
        branch: &str,
        commit_sha: &str,
        message: &str,
    ) -> JobResult<()> {
        let platform = self.ctx.platform;
        let marker = trigger_marker(commit_sha);
        if platform
            .has_commented_marker(mr, self.ctx.user.id, &marker)
            .await?
        {
            return Err(JobError::cannot_merge(format!(
                "{message}\n\nI don't know what else I can do. You may need to manually trigger the pipeline or rename the branch."
            )));
        }

        let Some(pipeline) = platform.create_pipeline(project_id, branch, mr).await? else {
            return Err(JobError::cannot_merge(format!(
                "{message}\n\nI couldn't create a new pipeline."
            )));
        };

        info!(mr_iid = mr.iid, pipeline_id = pipeline.id, "created pipeline");
        let body = format!(
            "{message}\n\n{marker}(/../commit/{commit_sha}): [#{id}](/../pipelines/{id}).",
            id = pipeline.id
        );
        platform.comment(mr, &body).await?;
        Ok(())
    }

    /// Poll until the pipeline on `commit_sha` succeeds
    ///
    /// Fails on a failed or canceled pipeline, or once `ci_timeout` is up.
    pub async fn wait_for_ci_to_pass(&self, mr: &MergeRequest, commit_sha: &str) -> JobResult<()> {
        let clock = self.ctx.clock;
        let deadline = clock.deadline(self.ctx.options.ci_timeout);
        info!(mr_iid = mr.iid, sha = commit_sha, "waiting for CI to pass");

        while clock.now() < deadline {
            let status = match self.get_mr_ci_status(mr, commit_sha).await {
                Ok(status) => status,
                Err(JobError::Tooling(err)) if err.is_transient() => {
                    warn!(mr_iid = mr.iid, error = %err, "GitLab hiccup while polling CI, ignoring");
                    None
                }
                Err(err) => return Err(err),
            };

            match status {
                Some(PipelineStatus::Success) => {
                    info!(mr_iid = mr.iid, "CI passed");
                    return Ok(());
                }
                Some(PipelineStatus::Failed) => return Err(JobError::cannot_merge("CI failed!")),
                Some(PipelineStatus::Canceled) => {
                    return Err(JobError::cannot_merge("Someone canceled the CI."));
                }
                Some(PipelineStatus::Pending | PipelineStatus::Running) => {}
                other => warn!(mr_iid = mr.iid, status = ?other, "suspicious CI status"),
            }

            debug!(secs = CI_POLL_INTERVAL.as_secs(), "polling CI again later");
            clock.sleep(CI_POLL_INTERVAL).await;
        }

        Err(JobError::cannot_merge("CI is taking too long."))
    }
}
