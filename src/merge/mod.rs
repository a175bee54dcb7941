//! Merge workflow for a single merge request
//!
//! Split the same way throughout:
//! 1. Check - pure eligibility rules over already fetched data
//! 2. Steps - effectful pieces (publish, trailers, CI, approvals), each an
//!    `impl MergeJob` block in its own module
//! 3. Job - `MergeJob::execute` composes the steps and owns the outcome

mod ci;
mod eligibility;
mod fusion;
mod job;
mod outcome;
mod reapprove;
mod temp_branch;
mod trailers;

pub use ci::{CI_POLL_INTERVAL, has_required_job, sort_pipelines, trigger_marker};
pub use eligibility::{check_before_approvals, check_eligibility};
pub use fusion::{PUSH_SETTLE_DELAY, Published};
pub use job::{JobContext, MERGE_POLL_INTERVAL, MergeJob, reassigned_to_author};
pub use outcome::{JobError, JobResult, JobState, Outcome};
pub use reapprove::APPROVAL_POLL_INTERVAL;
pub use temp_branch::TEMP_BRANCH_SETTLE_DELAY;
pub use trailers::{part_of_value, tested_by_value};
