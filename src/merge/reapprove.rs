//! Restore approvals reset by our push

use std::time::Duration;

use tracing::{debug, info};

use crate::merge::job::MergeJob;
use crate::merge::outcome::{JobError, JobResult};
use crate::types::{Approvals, MergeRequest};

/// Poll interval while waiting for GitLab to reset approvals
pub const APPROVAL_POLL_INTERVAL: Duration = Duration::from_secs(5);

impl MergeJob<'_> {
    /// Re-approve `mr` on behalf of `approvals`' approvers if our push reset
    /// them.
    ///
    /// Approving twice is an error on GitLab's side, so nothing is sent while
    /// the approvals are still in place.
    pub async fn maybe_reapprove(&self, mr: &MergeRequest, approvals: &Approvals) -> JobResult<()> {
        if !self.ctx.options.reapprove {
            return Ok(());
        }
        let platform = self.ctx.platform;
        let clock = self.ctx.clock;

        info!(mr_iid = mr.iid, "checking if approvals have reset");
        let deadline = clock.deadline(self.ctx.options.approval_timeout);
        let mut sufficient = platform.fetch_approvals(mr).await?.sufficient();
        while sufficient && clock.now() < deadline {
            debug!(secs = APPROVAL_POLL_INTERVAL.as_secs(), "approvals haven't reset yet");
            clock.sleep(APPROVAL_POLL_INTERVAL).await;
            sufficient = platform.fetch_approvals(mr).await?.sufficient();
        }
        if sufficient {
            return Ok(());
        }

        match platform.reapprove(mr, approvals).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_forbidden() => {
                info!(mr_iid = mr.iid, "impersonation forbidden, approving with own id");
                match platform.approve(mr).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_unauthorized() || err.is_forbidden() => Err(
                        JobError::cannot_merge("Sorry, I need a human to approve this MR."),
                    ),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}
