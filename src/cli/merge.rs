//! Bot loop - merge every merge request assigned to the bot

use crate::cli::context::BotContext;
use marge::clock::{Clock, SystemClock};
use marge::error::Result;
use marge::merge::{JobContext, MergeJob, Outcome};
use marge::platform::ChangeRequestService;
use marge::types::{MergeRequest, Project};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause between passes over all projects
const PASS_INTERVAL: Duration = Duration::from_secs(60);

/// Posted when a job dies on a tooling error
const BROKEN_MESSAGE: &str = "I'm broken on the inside, please somebody fix me... :cry:";

/// Process all projects, once or forever
#[allow(clippy::future_not_send)]
pub async fn run_bot(ctx: &BotContext) -> Result<()> {
    let clock = SystemClock;
    loop {
        for project in &ctx.projects {
            if let Err(err) = process_project(ctx, project, &clock).await {
                error!(project = %project.path_with_namespace, error = %err, "stopped processing project");
            }
        }
        if ctx.settings.run_once {
            return Ok(());
        }
        info!(secs = PASS_INTERVAL.as_secs(), "sleeping before next pass");
        clock.sleep(PASS_INTERVAL).await;
    }
}

/// Whether the branch filters let `mr` through
fn wanted(ctx: &BotContext, mr: &MergeRequest) -> bool {
    ctx.settings.branch_regexp.is_match(&mr.target_branch)
        && ctx.settings.source_branch_regexp.is_match(&mr.source_branch)
}

#[allow(clippy::future_not_send)]
async fn process_project(ctx: &BotContext, project: &Project, clock: &dyn Clock) -> Result<()> {
    let platform = &ctx.platform;
    let listing = platform
        .list_open_assigned_to(project.id, ctx.user.id)
        .await;
    let mrs = listing_or_empty(listing, project)?;
    let mrs: Vec<MergeRequest> = mrs.into_iter().filter(|mr| wanted(ctx, mr)).collect();
    info!(project = %project.path_with_namespace, count = mrs.len(), "merge requests to process");
    if mrs.is_empty() {
        return Ok(());
    }

    let repo = ctx.worktree_for(project)?;
    for mr in &mrs {
        let job = MergeJob::new(JobContext {
            platform,
            repo: &repo,
            clock,
            user: &ctx.user,
            project,
            options: &ctx.settings.options,
        });

        match job.execute(mr).await {
            Ok(Outcome::Merged) => info!(mr_iid = mr.iid, "merged"),
            Ok(Outcome::Skipped(reason)) => info!(mr_iid = mr.iid, reason = %reason, "skipped"),
            Ok(Outcome::Failed(reason)) => {
                report(platform, mr, &format!("I couldn't merge this branch: {reason}")).await;
                if let Err(err) = job.unassign_from_mr(mr).await {
                    warn!(mr_iid = mr.iid, error = %err, "failed to unassign");
                }
            }
            Err(err) => {
                error!(mr_iid = mr.iid, error = %err, "merge job failed unexpectedly");
                report(platform, mr, BROKEN_MESSAGE).await;
                if let Err(unassign_err) = job.unassign_from_mr(mr).await {
                    warn!(mr_iid = mr.iid, error = %unassign_err, "failed to unassign");
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

/// A transient GitLab failure while listing is treated as nothing to do
fn listing_or_empty(
    listing: Result<Vec<MergeRequest>>,
    project: &Project,
) -> Result<Vec<MergeRequest>> {
    match listing {
        Err(err) if err.is_transient() => {
            warn!(project = %project.path_with_namespace, error = %err, "ignoring failed merge request listing");
            Ok(Vec::new())
        }
        other => other,
    }
}

async fn report(platform: &dyn ChangeRequestService, mr: &MergeRequest, body: &str) {
    if let Err(err) = platform.comment(mr, body).await {
        warn!(mr_iid = mr.iid, error = %err, "failed to comment");
    }
}
