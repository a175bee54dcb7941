//! Merge job options
//!
//! `JobOptions` is assembled once per run by [`JobOptionsBuilder`] and then
//! shared read-only by every merge job.

use crate::interval::IntervalUnion;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

/// Default time to wait for CI to finish
pub const DEFAULT_CI_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Default time to wait for GitLab to finish an accepted merge
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default number of fuse/push/accept rounds before giving up
pub const DEFAULT_MAX_FUSION_ATTEMPTS: u32 = 3;

/// How the source branch is brought up to date with the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fusion {
    /// Replay source commits on top of the target (linear history)
    #[default]
    Rebase,
    /// Merge the target into the source with a merge commit
    Merge,
}

impl std::fmt::Display for Fusion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rebase => write!(f, "rebase"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// Immutable settings for merge jobs
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct JobOptions {
    /// Add `Tested-by` trailers
    pub add_tested: bool,
    /// Add a `Part-of` trailer linking back to the MR
    pub add_part_of: bool,
    /// Add `Reviewed-by` trailers for every approver
    pub add_reviewers: bool,
    /// Restore approvals that our push reset
    pub reapprove: bool,
    /// How long to wait for GitLab to reset approvals after a push
    pub approval_timeout: Duration,
    /// Windows during which nothing is merged
    pub embargo: IntervalUnion,
    /// How long to wait for CI
    pub ci_timeout: Duration,
    /// Rebase or merge-commit
    pub fusion: Fusion,
    /// At least one pipeline job must match this for CI to count
    pub job_regexp: Regex,
    /// Create pipelines when none (or an incomplete one) exists
    pub create_pipeline: bool,
    /// Shared branch in the target project used to run CI for forks
    pub temp_branch: Option<String>,
    /// Fuse/push/accept rounds before giving up
    pub max_fusion_attempts: u32,
    /// How long to wait for an accepted MR to show up as merged
    pub merge_timeout: Duration,
    /// Ask GitLab to delete the source branch after merging
    pub remove_source_branch: bool,
}

impl JobOptions {
    /// Start from the defaults
    pub fn builder() -> JobOptionsBuilder {
        JobOptionsBuilder::default()
    }

    /// Whether any trailer is requested
    pub const fn requests_commit_tagging(&self) -> bool {
        self.add_tested || self.add_part_of || self.add_reviewers
    }

    /// Whether the merge-commit strategy is in use
    pub fn use_merge_strategy(&self) -> bool {
        self.fusion == Fusion::Merge
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`JobOptions`]
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct JobOptionsBuilder {
    add_tested: bool,
    add_part_of: bool,
    add_reviewers: bool,
    reapprove: bool,
    approval_timeout: Option<Duration>,
    embargo: Option<IntervalUnion>,
    ci_timeout: Option<Duration>,
    fusion: Fusion,
    job_regexp: Option<Regex>,
    create_pipeline: bool,
    temp_branch: Option<String>,
    max_fusion_attempts: Option<u32>,
    merge_timeout: Option<Duration>,
    keep_source_branch: bool,
}

impl JobOptionsBuilder {
    /// Toggle `Tested-by` trailers
    #[must_use]
    pub const fn add_tested(mut self, yes: bool) -> Self {
        self.add_tested = yes;
        self
    }

    /// Toggle the `Part-of` trailer
    #[must_use]
    pub const fn add_part_of(mut self, yes: bool) -> Self {
        self.add_part_of = yes;
        self
    }

    /// Toggle `Reviewed-by` trailers
    #[must_use]
    pub const fn add_reviewers(mut self, yes: bool) -> Self {
        self.add_reviewers = yes;
        self
    }

    /// Toggle re-approval after pushes
    #[must_use]
    pub const fn reapprove(mut self, yes: bool) -> Self {
        self.reapprove = yes;
        self
    }

    /// Bound on waiting for approvals to reset
    #[must_use]
    pub const fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    /// Merge embargo
    #[must_use]
    pub fn embargo(mut self, embargo: IntervalUnion) -> Self {
        self.embargo = Some(embargo);
        self
    }

    /// Bound on waiting for CI
    #[must_use]
    pub const fn ci_timeout(mut self, timeout: Duration) -> Self {
        self.ci_timeout = Some(timeout);
        self
    }

    /// Fusion strategy
    #[must_use]
    pub const fn fusion(mut self, fusion: Fusion) -> Self {
        self.fusion = fusion;
        self
    }

    /// Required job name pattern
    #[must_use]
    pub fn job_regexp(mut self, regexp: Regex) -> Self {
        self.job_regexp = Some(regexp);
        self
    }

    /// Toggle pipeline creation
    #[must_use]
    pub const fn create_pipeline(mut self, yes: bool) -> Self {
        self.create_pipeline = yes;
        self
    }

    /// Shared temp branch for fork CI; blank names disable it
    #[must_use]
    pub fn temp_branch(mut self, name: Option<String>) -> Self {
        self.temp_branch = name.filter(|n| !n.trim().is_empty());
        self
    }

    /// Rounds of fuse/push/accept
    #[must_use]
    pub const fn max_fusion_attempts(mut self, attempts: u32) -> Self {
        self.max_fusion_attempts = Some(attempts);
        self
    }

    /// Bound on waiting for GitLab to finish merging
    #[must_use]
    pub const fn merge_timeout(mut self, timeout: Duration) -> Self {
        self.merge_timeout = Some(timeout);
        self
    }

    /// Keep the source branch around after merging
    #[must_use]
    pub const fn keep_source_branch(mut self, yes: bool) -> Self {
        self.keep_source_branch = yes;
        self
    }

    /// Freeze the options
    pub fn build(self) -> JobOptions {
        JobOptions {
            add_tested: self.add_tested,
            add_part_of: self.add_part_of,
            add_reviewers: self.add_reviewers,
            reapprove: self.reapprove,
            approval_timeout: self.approval_timeout.unwrap_or(Duration::ZERO),
            embargo: self.embargo.unwrap_or_else(IntervalUnion::empty),
            ci_timeout: self.ci_timeout.unwrap_or(DEFAULT_CI_TIMEOUT),
            fusion: self.fusion,
            job_regexp: self.job_regexp.unwrap_or_else(match_everything),
            create_pipeline: self.create_pipeline,
            temp_branch: self.temp_branch,
            max_fusion_attempts: self
                .max_fusion_attempts
                .unwrap_or(DEFAULT_MAX_FUSION_ATTEMPTS)
                .max(1),
            merge_timeout: self.merge_timeout.unwrap_or(DEFAULT_MERGE_TIMEOUT),
            remove_source_branch: !self.keep_source_branch,
        }
    }
}

fn match_everything() -> Regex {
    Regex::new(".*").expect("`.*` is a valid regex")
}
