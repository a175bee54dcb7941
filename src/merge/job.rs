//! Merge job - drives one merge request from assignment to merged
//!
//! The individual steps (publish, trailers, CI, temp branch, reapproval)
//! live in sibling modules as further `impl MergeJob` blocks.

use std::cell::Cell;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::git::{SOURCE, Worktree};
use crate::merge::eligibility::{check_before_approvals, check_eligibility};
use crate::merge::outcome::{JobError, JobResult, JobState, Outcome};
use crate::options::JobOptions;
use crate::platform::Platform;
use crate::types::{MergeRequest, MrState, Project, User};

/// Poll interval while waiting for GitLab to finish a merge
pub const MERGE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Everything a merge job works with, borrowed for the job's lifetime
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    /// Code host
    pub platform: &'a dyn Platform,
    /// Local clone of the target project
    pub repo: &'a dyn Worktree,
    /// Time source for every wait
    pub clock: &'a dyn Clock,
    /// The bot user
    pub user: &'a User,
    /// Target project
    pub project: &'a Project,
    /// Run-wide options
    pub options: &'a JobOptions,
}

/// Result of asking GitLab to merge
enum Acceptance {
    /// GitLab took the request
    Accepted,
    /// Someone else merged it first
    AlreadyMerged,
    /// The target branch moved after our push
    TargetMoved,
}

/// Merge job for a single merge request
pub struct MergeJob<'a> {
    pub(crate) ctx: JobContext<'a>,
    state: Cell<JobState>,
}

impl<'a> MergeJob<'a> {
    /// Create a job in the `Start` state
    pub fn new(ctx: JobContext<'a>) -> Self {
        Self {
            ctx,
            state: Cell::new(JobState::Start),
        }
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.state.get()
    }

    pub(crate) fn transition(&self, mr: &MergeRequest, next: JobState) {
        let previous = self.state.replace(next);
        info!(mr_iid = mr.iid, from = %previous, to = %next, "merge job state");
    }

    /// Run the whole workflow for `mr`
    ///
    /// Business failures come back as `Outcome::Skipped` / `Outcome::Failed`;
    /// only tooling failures are returned as `Err`.
    pub async fn execute(&self, mr: &MergeRequest) -> Result<Outcome> {
        info!(mr_iid = mr.iid, title = %mr.title, "processing merge request");
        let result = self.run(mr).await;
        match &result {
            Ok(()) => {}
            Err(JobError::Skip(reason)) => {
                info!(mr_iid = mr.iid, reason = %reason, "skipping");
                self.transition(mr, JobState::Skipped);
            }
            Err(JobError::CannotMerge(reason)) => {
                warn!(mr_iid = mr.iid, reason = %reason, "cannot merge");
                self.transition(mr, JobState::Failed);
            }
            Err(JobError::Tooling(err)) => {
                warn!(mr_iid = mr.iid, error = %err, "merge job broke");
                self.transition(mr, JobState::Failed);
            }
        }
        Outcome::from_result(result)
    }

    async fn run(&self, mr: &MergeRequest) -> JobResult<()> {
        let max_attempts = self.ctx.options.max_fusion_attempts;
        let mut attempt = 1;
        loop {
            let mr = self.ensure_mergeable_mr(mr).await?;
            self.transition(&mr, JobState::EligibilityChecked);

            // approvers as of now; our push may reset them
            let approvals = self.ctx.platform.fetch_approvals(&mr).await?;

            let (_source_project, source_repo_url) = self.fetch_source_project(&mr).await?;
            let published = self
                .update_from_target_branch_and_push(&mr, source_repo_url.as_deref())
                .await?;

            // restore approvals before CI so the re-check below can see them
            self.transition(&mr, JobState::Reapproving);
            self.maybe_reapprove(&mr, &approvals).await?;

            if self.requires_ci() {
                self.transition(&mr, JobState::AwaitingCi);
                self.wait_for_ci_to_pass(&mr, &published.rewritten_sha)
                    .await?;
            }

            let mr = self.ensure_mergeable_mr(&mr).await?;

            match self
                .accept(&mr, &published.rewritten_sha, &published.target_sha)
                .await?
            {
                Acceptance::Accepted => {
                    self.transition(&mr, JobState::Accepted);
                    self.wait_for_merged(&mr).await?;
                }
                Acceptance::AlreadyMerged => {
                    self.transition(&mr, JobState::Accepted);
                }
                Acceptance::TargetMoved if attempt < max_attempts => {
                    attempt += 1;
                    info!(mr_iid = mr.iid, attempt, max_attempts, "target branch moved, starting over");
                    continue;
                }
                Acceptance::TargetMoved => {
                    return Err(JobError::cannot_merge(format!(
                        "Gave up after {max_attempts} attempts: the target branch keeps moving."
                    )));
                }
            }

            self.delete_temp_branch(mr.source_project_id).await?;
            return Ok(());
        }
    }

    /// Whether we have to see a green pipeline before accepting
    fn requires_ci(&self) -> bool {
        let options = self.ctx.options;
        self.ctx.project.only_allow_merge_if_pipeline_succeeds
            || options.create_pipeline
            || options.temp_branch.is_some()
    }

    /// Whether "now" falls inside the configured embargo
    pub fn during_merge_embargo(&self) -> bool {
        self.ctx.options.embargo.covers(self.ctx.clock.now())
    }

    /// Refetch `mr` and check that it may be merged right now
    ///
    /// Returns the refreshed merge request.
    pub async fn ensure_mergeable_mr(&self, mr: &MergeRequest) -> JobResult<MergeRequest> {
        let mr = self.ctx.platform.refetch(mr).await?;
        info!(mr_iid = mr.iid, "ensuring merge request is mergeable");

        check_before_approvals(&mr, self.ctx.options)?;
        let approvals = self.ctx.platform.fetch_approvals(&mr).await?;
        check_eligibility(
            &mr,
            &approvals,
            self.ctx.clock.now(),
            self.ctx.user.id,
            self.ctx.options,
        )?;
        Ok(mr)
    }

    /// Resolve the project holding the source branch
    ///
    /// For forks the source project is fetched as the `source` remote and
    /// its URL is returned alongside.
    pub async fn fetch_source_project(
        &self,
        mr: &MergeRequest,
    ) -> JobResult<(Project, Option<String>)> {
        if !mr.is_from_fork() {
            return Ok((self.ctx.project.clone(), None));
        }

        let source_project = match self.ctx.platform.fetch_project(mr.source_project_id).await {
            Ok(project) => project,
            Err(err) if err.is_not_found() => {
                return Err(JobError::cannot_merge(
                    "I cannot find the source project. Do I have access?",
                ));
            }
            Err(err) => return Err(err.into()),
        };

        let url = source_project.ssh_url_to_repo.clone();
        self.ctx.repo.fetch(SOURCE, Some(&url))?;
        Ok((source_project, Some(url)))
    }

    async fn accept(
        &self,
        mr: &MergeRequest,
        sha: &str,
        target_sha: &str,
    ) -> JobResult<Acceptance> {
        let platform = self.ctx.platform;
        let err = match platform
            .request_merge(mr, sha, self.ctx.options.remove_source_branch)
            .await
        {
            Ok(()) => return Ok(Acceptance::Accepted),
            Err(err) => err,
        };

        if err.is_conflict() {
            return Err(JobError::cannot_merge(
                "Someone pushed to branch while I was waiting for CI to pass.",
            ));
        }

        if err.is_unauthorized() {
            return Err(JobError::cannot_merge("My user cannot accept merge requests!"));
        }

        if err.is_not_acceptable() {
            let head = platform
                .branch_head(self.ctx.project.id, &mr.target_branch)
                .await?;
            if head.as_deref() != Some(target_sha) {
                info!(mr_iid = mr.iid, "someone pushed to the target branch directly");
                platform
                    .comment(
                        mr,
                        "My job would be easier if people didn't jump the queue and push directly... *sigh*",
                    )
                    .await?;
                return Ok(Acceptance::TargetMoved);
            }
            let fresh = platform.refetch(mr).await?;
            if fresh.state == MrState::Merged {
                return Ok(Acceptance::AlreadyMerged);
            }
            return Err(JobError::cannot_merge(format!(
                "Merge request was rejected by GitLab: {}",
                api_message(&err)
            )));
        }

        if err.is_method_not_allowed() {
            warn!(mr_iid = mr.iid, error = %err, "merge not allowed");
            let fresh = platform.refetch(mr).await?;
            if fresh.state == MrState::Merged {
                return Ok(Acceptance::AlreadyMerged);
            }
            if fresh.work_in_progress {
                return Err(JobError::cannot_merge(
                    "The request was marked as WIP as I was processing it (maybe a WIP commit?)",
                ));
            }
            if fresh.state == MrState::Reopened {
                return Err(JobError::cannot_merge(
                    "GitLab refused to merge this branch. I suspect that a Merge Request was closed and reopened. Check the Web UI",
                ));
            }
            return Err(JobError::cannot_merge(format!(
                "GitLab refused to merge this request: {}",
                api_message(&err)
            )));
        }

        if err.is_not_found() {
            // lost a race against someone hitting "merge" by hand
            let fresh = platform.refetch(mr).await?;
            if fresh.state == MrState::Merged {
                return Ok(Acceptance::AlreadyMerged);
            }
            warn!(mr_iid = mr.iid, state = %fresh.state, "merge endpoint not found");
            return Err(err.into());
        }

        if matches!(err, Error::GitLabApi { .. }) && !err.is_transient() {
            warn!(mr_iid = mr.iid, error = %err, "unanticipated API error on merge");
            return Err(JobError::cannot_merge(
                "had some issue with GitLab, check my logs...",
            ));
        }
        Err(err.into())
    }

    /// Wait for GitLab to report `mr` as merged
    async fn wait_for_merged(&self, mr: &MergeRequest) -> JobResult<()> {
        let clock = self.ctx.clock;
        let deadline = clock.deadline(self.ctx.options.merge_timeout);
        while clock.now() < deadline {
            let fresh = self.ctx.platform.refetch(mr).await?;
            match fresh.state {
                MrState::Merged => {
                    info!(mr_iid = mr.iid, "merged");
                    return Ok(());
                }
                MrState::Closed => {
                    return Err(JobError::cannot_merge(
                        "someone closed the merge request while merging!",
                    ));
                }
                ref state if !state.is_open() => {
                    return Err(JobError::cannot_merge(format!(
                        "The merge request is in an unknown state: {state}"
                    )));
                }
                _ => {}
            }
            info!(
                mr_iid = mr.iid,
                secs = MERGE_POLL_INTERVAL.as_secs(),
                "giving GitLab more time to merge"
            );
            clock.sleep(MERGE_POLL_INTERVAL).await;
        }
        Err(JobError::cannot_merge(
            "It is taking too long to see the request marked as merged!",
        ))
    }

    /// Hand the merge request back to its author
    ///
    /// The bot is replaced by the author in the assignee list, or simply
    /// removed when the bot is the author.
    pub async fn unassign_from_mr(&self, mr: &MergeRequest) -> Result<()> {
        info!(mr_iid = mr.iid, "unassigning");
        let bot = self.ctx.user.id;
        let assignees = reassigned_to_author(&mr.assignee_ids, bot, mr.author_id);
        self.ctx.platform.set_assignees(mr, &assignees).await
    }
}

/// Assignee list with `bot` swapped for `author`
pub fn reassigned_to_author(assignees: &[u64], bot: u64, author: u64) -> Vec<u64> {
    let mut out = Vec::with_capacity(assignees.len());
    for &id in assignees {
        let id = if id == bot && author != bot { author } else { id };
        if id == bot || out.contains(&id) {
            continue;
        }
        out.push(id);
    }
    out
}

fn api_message(err: &Error) -> String {
    match err {
        Error::GitLabApi { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
