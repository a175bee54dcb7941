//! Eligibility rules - pure functions
//!
//! No I/O happens here. The job refetches the merge request and its
//! approvals and hands them in, so the rule order can be unit tested.

use crate::merge::outcome::{JobError, JobResult};
use crate::options::JobOptions;
use crate::types::{Approvals, MergeRequest};
use chrono::{DateTime, Utc};

/// Rules that must hold before approvals are even looked at
pub fn check_before_approvals(mr: &MergeRequest, options: &JobOptions) -> JobResult<()> {
    if mr.work_in_progress {
        return Err(JobError::cannot_merge(
            "Sorry, I can't merge requests marked as Work-In-Progress!",
        ));
    }

    if mr.squash && options.requests_commit_tagging() {
        return Err(JobError::cannot_merge(
            "Sorry, merging requests marked as auto-squash would ruin my commit tagging!",
        ));
    }

    Ok(())
}

/// Check whether `mr` may be merged at `now` by `bot_user_id`
///
/// Rules are evaluated in order and the first failure wins:
/// draft, squash vs. trailers, approvals, state, embargo, assignment.
pub fn check_eligibility(
    mr: &MergeRequest,
    approvals: &Approvals,
    now: DateTime<Utc>,
    bot_user_id: u64,
    options: &JobOptions,
) -> JobResult<()> {
    check_before_approvals(mr, options)?;

    if !approvals.sufficient() {
        return Err(JobError::cannot_merge(format!(
            "Insufficient approvals (have: [{}] missing: {})",
            approvals.approver_usernames.join(", "),
            approvals.approvals_left
        )));
    }

    if mr.state.is_done() {
        return Err(JobError::skip(format!(
            "The merge request is already {}!",
            mr.state
        )));
    }
    if !mr.state.is_open() {
        return Err(JobError::cannot_merge(format!(
            "The merge request is in an unknown state: {}",
            mr.state
        )));
    }

    if options.embargo.covers(now) {
        return Err(JobError::skip("Merge embargo!"));
    }

    if !mr.is_assigned_to(bot_user_id) {
        return Err(JobError::skip("It is not assigned to me anymore!"));
    }

    Ok(())
}
