//! Job results and failure taxonomy

use crate::error;
use crate::git::GitError;
use thiserror::Error;

/// Failure of a single merge job step
///
/// `Skip` and `CannotMerge` are business outcomes that end the job for this
/// merge request. `Tooling` means something is wrong with us or our
/// collaborators and should be reported as such.
#[derive(Debug, Error)]
pub enum JobError {
    /// Nothing to do right now; leave the merge request alone
    #[error("{0}")]
    Skip(String),

    /// The merge request cannot be merged; tell the humans why
    #[error("{0}")]
    CannotMerge(String),

    /// Transport, API or git failure
    #[error(transparent)]
    Tooling(#[from] error::Error),
}

impl From<GitError> for JobError {
    fn from(err: GitError) -> Self {
        Self::Tooling(err.into())
    }
}

impl JobError {
    /// Build a `Skip`
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }

    /// Build a `CannotMerge`
    pub fn cannot_merge(reason: impl Into<String>) -> Self {
        Self::CannotMerge(reason.into())
    }

    /// Reason text for business outcomes
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Skip(r) | Self::CannotMerge(r) => Some(r),
            Self::Tooling(_) => None,
        }
    }
}

/// Result alias for job steps
pub type JobResult<T> = Result<T, JobError>;

/// Terminal business result of a merge job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// GitLab reports the merge request as merged
    Merged,
    /// Left alone for now
    Skipped(String),
    /// Gave up; the reason is meant for the merge request's author
    Failed(String),
}

impl Outcome {
    /// Fold a job result into an outcome, surfacing tooling errors
    pub fn from_result(result: JobResult<()>) -> error::Result<Self> {
        match result {
            Ok(()) => Ok(Self::Merged),
            Err(JobError::Skip(reason)) => Ok(Self::Skipped(reason)),
            Err(JobError::CannotMerge(reason)) => Ok(Self::Failed(reason)),
            Err(JobError::Tooling(err)) => Err(err),
        }
    }

    /// Whether the job ended with a merge
    #[must_use]
    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged)
    }
}

/// Where a merge job currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    /// Nothing done yet
    #[default]
    Start,
    /// Merge request passed the eligibility rules
    EligibilityChecked,
    /// Source branch rebased or merged onto the target
    Fused,
    /// Trailers written into the commits
    TrailersApplied,
    /// Rewritten branch pushed (or already up to date)
    Pushed,
    /// Restoring approvals
    Reapproving,
    /// Polling CI
    AwaitingCi,
    /// GitLab accepted the merge
    Accepted,
    /// Left alone
    Skipped,
    /// Gave up
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::EligibilityChecked => "eligibility-checked",
            Self::Fused => "fused",
            Self::TrailersApplied => "trailers-applied",
            Self::Pushed => "pushed",
            Self::Reapproving => "reapproving",
            Self::AwaitingCi => "awaiting-ci",
            Self::Accepted => "accepted",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}
