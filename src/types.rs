//! Core types for marge
//!
//! Typed records for the GitLab entities the merge workflow reads. The
//! platform layer parses wire payloads into these at fetch time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a merge request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MrState {
    /// Open for review
    Opened,
    /// Closed, then opened again
    Reopened,
    /// Locked while GitLab performs a merge
    Locked,
    /// Merged into the target branch
    Merged,
    /// Closed without merging
    Closed,
    /// Anything GitLab may add in the future
    Unknown(String),
}

impl MrState {
    /// Parse GitLab's `state` attribute
    pub fn parse(state: &str) -> Self {
        match state {
            "opened" => Self::Opened,
            "reopened" => Self::Reopened,
            "locked" => Self::Locked,
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// States in which a merge can still be attempted
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Opened | Self::Reopened | Self::Locked)
    }

    /// States in which there is nothing left to do
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Merged | Self::Closed)
    }
}

impl std::fmt::Display for MrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Reopened => write!(f, "reopened"),
            Self::Locked => write!(f, "locked"),
            Self::Merged => write!(f, "merged"),
            Self::Closed => write!(f, "closed"),
            Self::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// A GitLab merge request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Global id
    pub id: u64,
    /// Project-scoped id (the `!123` number)
    pub iid: u64,
    /// Target project id
    pub project_id: u64,
    /// MR title
    pub title: String,
    /// Lifecycle state
    pub state: MrState,
    /// Branch holding the changes
    pub source_branch: String,
    /// Branch the changes are proposed for
    pub target_branch: String,
    /// Head commit of the source branch
    pub sha: String,
    /// Project the source branch lives in (differs for forks)
    pub source_project_id: u64,
    /// Project the MR targets
    pub target_project_id: u64,
    /// Draft / work-in-progress flag
    pub work_in_progress: bool,
    /// Whether GitLab will squash on merge
    pub squash: bool,
    /// Assigned users
    pub assignee_ids: Vec<u64>,
    /// Author user id
    pub author_id: u64,
    /// Web URL for the MR
    pub web_url: String,
}

impl MergeRequest {
    /// Whether `user_id` is among the assignees
    pub fn is_assigned_to(&self, user_id: u64) -> bool {
        self.assignee_ids.contains(&user_id)
    }

    /// Whether the source branch lives in another project
    pub const fn is_from_fork(&self) -> bool {
        self.source_project_id != self.target_project_id
    }

    /// Ref under which GitLab keeps the MR head in the target project
    pub fn pipeline_ref(&self) -> String {
        format!("refs/merge-requests/{}/head", self.iid)
    }
}

/// Approval state of a merge request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Approvals {
    /// Project id of the MR
    pub project_id: u64,
    /// MR iid
    pub iid: u64,
    /// Usernames of users who approved
    pub approver_usernames: Vec<String>,
    /// Ids of users who approved
    pub approver_ids: Vec<u64>,
    /// Approvals still required
    pub approvals_left: u32,
}

impl Approvals {
    /// No more approvals required
    pub const fn sufficient(&self) -> bool {
        self.approvals_left == 0
    }
}

/// Pipeline status as reported by GitLab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    /// Created, not yet queued
    Created,
    /// Queued
    Pending,
    /// Running
    Running,
    /// Finished successfully
    Success,
    /// Finished with a failure
    Failed,
    /// Canceled by someone
    Canceled,
    /// Skipped
    Skipped,
    /// Waiting on a manual action
    Manual,
    /// Any status not listed above
    Other(String),
}

impl PipelineStatus {
    /// Parse GitLab's `status` attribute
    pub fn parse(status: &str) -> Self {
        match status {
            "created" => Self::Created,
            "pending" => Self::Pending,
            "running" => Self::Running,
            "success" => Self::Success,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            "skipped" => Self::Skipped,
            "manual" => Self::Manual,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
            Self::Skipped => write!(f, "skipped"),
            Self::Manual => write!(f, "manual"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A CI pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline id
    pub id: u64,
    /// Project the pipeline runs in
    pub project_id: u64,
    /// Current status
    pub status: PipelineStatus,
    /// Ref the pipeline was created for
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Commit the pipeline runs on
    pub sha: String,
    /// Creation time, if reported
    pub created_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// Pipelines GitLab created for a merge request ref
    pub fn is_merge_request_pipeline(&self) -> bool {
        self.ref_name.starts_with("refs/merge-requests/")
    }
}

/// A single job in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineJob {
    /// Job id
    pub id: u64,
    /// Job name from `.gitlab-ci.yml`
    pub name: String,
    /// Job status
    pub status: String,
}

/// A GitLab project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project id
    pub id: u64,
    /// `group/subgroup/name`
    pub path_with_namespace: String,
    /// SSH clone URL
    pub ssh_url_to_repo: String,
    /// HTTP clone URL
    pub http_url_to_repo: String,
    /// Whether merging requires a successful pipeline
    pub only_allow_merge_if_pipeline_succeeds: bool,
    /// Default branch, if the repository is not empty
    pub default_branch: Option<String>,
}

/// A GitLab user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: u64,
    /// Login name
    pub username: String,
    /// Display name
    pub name: String,
    /// Public or (for admins) private email
    pub email: Option<String>,
}

impl User {
    /// `Name <email>` as used in commit trailers
    pub fn trailer_identity(&self) -> String {
        match &self.email {
            Some(email) => format!("{} <{}>", self.name, email),
            None => format!("{} <{}@users.noreply>", self.name, self.username),
        }
    }
}
