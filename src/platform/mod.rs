//! Platform services for GitLab
//!
//! The merge workflow talks to the code host only through these traits.
//! They are split by concern; [`Platform`] bundles them for callers that
//! need everything, and is implemented automatically.

mod gitlab;

pub use gitlab::GitLabService;

use crate::error::Result;
use crate::types::{
    Approvals, MergeRequest, Pipeline, PipelineJob, Project, User,
};
use async_trait::async_trait;

/// Merge request reads and writes
#[async_trait]
pub trait ChangeRequestService: Send + Sync {
    /// Fetch the current state of a merge request
    async fn fetch_merge_request(&self, project_id: u64, iid: u64) -> Result<MergeRequest>;

    /// Refetch `mr` from the server
    ///
    /// Convenience wrapper over [`fetch_merge_request`].
    ///
    /// [`fetch_merge_request`]: Self::fetch_merge_request
    async fn refetch(&self, mr: &MergeRequest) -> Result<MergeRequest> {
        self.fetch_merge_request(mr.project_id, mr.iid).await
    }

    /// Open merge requests of a project assigned to `user_id`, oldest first
    async fn list_open_assigned_to(&self, project_id: u64, user_id: u64)
    -> Result<Vec<MergeRequest>>;

    /// Post a comment
    async fn comment(&self, mr: &MergeRequest, body: &str) -> Result<()>;

    /// Close without merging
    async fn close(&self, mr: &MergeRequest) -> Result<()>;

    /// Replace the assignee list
    async fn set_assignees(&self, mr: &MergeRequest, user_ids: &[u64]) -> Result<()>;

    /// Ask GitLab to merge once its pipeline succeeds.
    ///
    /// `expected_sha` makes GitLab reject the merge if the head moved.
    async fn request_merge(
        &self,
        mr: &MergeRequest,
        expected_sha: &str,
        remove_source_branch: bool,
    ) -> Result<()>;

    /// Whether `user_id` has left a comment containing `marker`
    async fn has_commented_marker(
        &self,
        mr: &MergeRequest,
        user_id: u64,
        marker: &str,
    ) -> Result<bool>;
}

/// Approval reads and writes
#[async_trait]
pub trait ApprovalService: Send + Sync {
    /// Current approvals of `mr`
    async fn fetch_approvals(&self, mr: &MergeRequest) -> Result<Approvals>;

    /// Approve as the authenticated user
    async fn approve(&self, mr: &MergeRequest) -> Result<()>;

    /// Approve again on behalf of everyone in `approvals`.
    ///
    /// Needs impersonation rights; fails with HTTP 403 without them.
    async fn reapprove(&self, mr: &MergeRequest, approvals: &Approvals) -> Result<()>;
}

/// Pipeline reads and writes
#[async_trait]
pub trait PipelineService: Send + Sync {
    /// Pipelines for `branch` (or `ref_override` when given), newest id first
    async fn pipelines_by_branch(
        &self,
        project_id: u64,
        branch: &str,
        ref_override: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<Pipeline>>;

    /// Jobs of a pipeline
    async fn pipeline_jobs(&self, pipeline: &Pipeline) -> Result<Vec<PipelineJob>>;

    /// Create a pipeline for `ref_name`; `None` when GitLab refuses
    async fn create_pipeline(
        &self,
        project_id: u64,
        ref_name: &str,
        mr: &MergeRequest,
    ) -> Result<Option<Pipeline>>;

    /// Cancel a running pipeline
    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()>;
}

/// Branch administration on the target project
#[async_trait]
pub trait BranchAdminService: Send + Sync {
    /// Head commit of `branch`, `None` if it does not exist
    async fn branch_head(&self, project_id: u64, branch: &str) -> Result<Option<String>>;

    /// Create `branch` at `sha`
    async fn create_branch(&self, project_id: u64, branch: &str, sha: &str) -> Result<()>;

    /// Protect `branch` so pipelines run with protected variables
    async fn protect_branch(&self, project_id: u64, branch: &str) -> Result<()>;

    /// Remove protection from `branch`
    async fn unprotect_branch(&self, project_id: u64, branch: &str) -> Result<()>;

    /// Delete `branch`
    async fn delete_branch(&self, project_id: u64, branch: &str) -> Result<()>;
}

/// Projects and users
#[async_trait]
pub trait ProjectService: Send + Sync {
    /// Fetch a project by id
    async fn fetch_project(&self, project_id: u64) -> Result<Project>;

    /// Fetch a project by `group/name` path
    async fn fetch_project_by_path(&self, path: &str) -> Result<Project>;

    /// Fetch a user by id
    async fn fetch_user(&self, user_id: u64) -> Result<User>;

    /// The user the token belongs to
    async fn current_user(&self) -> Result<User>;
}

/// Everything the merge workflow needs from the code host
pub trait Platform:
    ChangeRequestService + ApprovalService + PipelineService + BranchAdminService + ProjectService
{
}

impl<T> Platform for T where
    T: ChangeRequestService
        + ApprovalService
        + PipelineService
        + BranchAdminService
        + ProjectService
{
}
