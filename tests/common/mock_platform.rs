//! Mock GitLab for testing
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

use async_trait::async_trait;
use marge::error::{Error, Result};
use marge::platform::{
    ApprovalService, BranchAdminService, ChangeRequestService, PipelineService, ProjectService,
};
use marge::types::{
    Approvals, MergeRequest, MrState, Pipeline, PipelineJob, Project, User,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Call record for `request_merge`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMergeCall {
    pub iid: u64,
    pub sha: String,
    pub remove_source_branch: bool,
}

/// Call record for `pipelines_by_branch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinesCall {
    pub project_id: u64,
    pub branch: String,
    pub ref_override: Option<String>,
}

/// Call record for `create_pipeline`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePipelineCall {
    pub project_id: u64,
    pub ref_name: String,
}

/// A note on the merge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub author_id: u64,
    pub body: String,
}

/// Hand-written mock of every platform trait
///
/// Features:
/// - One merge request whose state tests can change between calls
/// - Scripted approval sequences (the last entry sticks)
/// - Call tracking for verification
/// - Error injection by HTTP status, one-shot or sticky
pub struct MockPlatform {
    bot_id: u64,
    mr: Mutex<Option<MergeRequest>>,
    approvals: Mutex<VecDeque<Approvals>>,
    pipelines: Mutex<Vec<Pipeline>>,
    jobs: Mutex<Vec<PipelineJob>>,
    notes: Mutex<Vec<Note>>,
    branches: Mutex<HashMap<String, String>>,
    protected: Mutex<Vec<String>>,
    projects: Mutex<HashMap<u64, Project>>,
    users: Mutex<HashMap<u64, User>>,
    next_pipeline_id: AtomicU64,
    /// GitLab flips the MR to merged as soon as the merge is requested
    merge_on_accept: Mutex<bool>,
    /// `create_pipeline` returns `None`
    refuse_pipelines: Mutex<bool>,
    // Call tracking
    fetch_approvals_calls: Mutex<usize>,
    refetch_calls: Mutex<usize>,
    request_merge_calls: Mutex<Vec<RequestMergeCall>>,
    pipelines_calls: Mutex<Vec<PipelinesCall>>,
    create_pipeline_calls: Mutex<Vec<CreatePipelineCall>>,
    set_assignees_calls: Mutex<Vec<Vec<u64>>>,
    reapprove_calls: Mutex<Vec<Vec<u64>>>,
    approve_calls: Mutex<usize>,
    deleted_branches: Mutex<Vec<String>>,
    unprotected_branches: Mutex<Vec<String>>,
    // Error injection (HTTP status codes)
    refetch_errors: Mutex<VecDeque<u16>>,
    request_merge_errors: Mutex<VecDeque<u16>>,
    error_on_reapprove: Mutex<Option<u16>>,
    error_on_approve: Mutex<Option<u16>>,
    error_on_fetch_project: Mutex<Option<u16>>,
    error_on_delete_branch: Mutex<Option<u16>>,
}

fn pop_error(queue: &Mutex<VecDeque<u16>>) -> Result<()> {
    match queue.lock().unwrap().pop_front() {
        Some(status) => Err(Error::api(status, format!("injected HTTP {status}"))),
        None => Ok(()),
    }
}

fn sticky_error(slot: &Mutex<Option<u16>>) -> Result<()> {
    match *slot.lock().unwrap() {
        Some(status) => Err(Error::api(status, format!("injected HTTP {status}"))),
        None => Ok(()),
    }
}

impl MockPlatform {
    /// Create an empty mock acting for bot user `bot_id`
    pub fn new(bot_id: u64) -> Self {
        Self {
            bot_id,
            mr: Mutex::new(None),
            approvals: Mutex::new(VecDeque::new()),
            pipelines: Mutex::new(Vec::new()),
            jobs: Mutex::new(Vec::new()),
            notes: Mutex::new(Vec::new()),
            branches: Mutex::new(HashMap::new()),
            protected: Mutex::new(Vec::new()),
            projects: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            next_pipeline_id: AtomicU64::new(1000),
            merge_on_accept: Mutex::new(true),
            refuse_pipelines: Mutex::new(false),
            fetch_approvals_calls: Mutex::new(0),
            refetch_calls: Mutex::new(0),
            request_merge_calls: Mutex::new(Vec::new()),
            pipelines_calls: Mutex::new(Vec::new()),
            create_pipeline_calls: Mutex::new(Vec::new()),
            set_assignees_calls: Mutex::new(Vec::new()),
            reapprove_calls: Mutex::new(Vec::new()),
            approve_calls: Mutex::new(0),
            deleted_branches: Mutex::new(Vec::new()),
            unprotected_branches: Mutex::new(Vec::new()),
            refetch_errors: Mutex::new(VecDeque::new()),
            request_merge_errors: Mutex::new(VecDeque::new()),
            error_on_reapprove: Mutex::new(None),
            error_on_approve: Mutex::new(None),
            error_on_fetch_project: Mutex::new(None),
            error_on_delete_branch: Mutex::new(None),
        }
    }

    // === Setup ===

    /// Set the merge request served by `fetch_merge_request`
    pub fn set_mr(&self, mr: MergeRequest) {
        *self.mr.lock().unwrap() = Some(mr);
    }

    /// Change the stored merge request in place
    pub fn update_mr(&self, f: impl FnOnce(&mut MergeRequest)) {
        if let Some(mr) = self.mr.lock().unwrap().as_mut() {
            f(mr);
        }
    }

    /// Current stored merge request
    pub fn mr(&self) -> MergeRequest {
        self.mr.lock().unwrap().clone().expect("no merge request set")
    }

    /// Approvals returned by successive `fetch_approvals` calls
    pub fn set_approvals(&self, sequence: Vec<Approvals>) {
        *self.approvals.lock().unwrap() = sequence.into();
    }

    /// Pipelines served by `pipelines_by_branch`
    pub fn set_pipelines(&self, pipelines: Vec<Pipeline>) {
        *self.pipelines.lock().unwrap() = pipelines;
    }

    /// Jobs served by `pipeline_jobs`
    pub fn set_jobs(&self, jobs: Vec<PipelineJob>) {
        *self.jobs.lock().unwrap() = jobs;
    }

    /// Pre-existing note on the merge request
    pub fn add_note(&self, author_id: u64, body: &str) {
        self.notes.lock().unwrap().push(Note {
            author_id,
            body: body.to_string(),
        });
    }

    /// Pre-existing branch in the target project
    pub fn set_branch(&self, name: &str, sha: &str) {
        self.branches
            .lock()
            .unwrap()
            .insert(name.to_string(), sha.to_string());
    }

    /// Project served by `fetch_project`
    pub fn add_project(&self, project: Project) {
        self.projects.lock().unwrap().insert(project.id, project);
    }

    /// User served by `fetch_user`
    pub fn add_user(&self, user: User) {
        self.users.lock().unwrap().insert(user.id, user);
    }

    /// Whether a successful `request_merge` marks the MR merged
    pub fn set_merge_on_accept(&self, yes: bool) {
        *self.merge_on_accept.lock().unwrap() = yes;
    }

    /// Make `create_pipeline` return `None`
    pub fn refuse_pipelines(&self) {
        *self.refuse_pipelines.lock().unwrap() = true;
    }

    // === Error injection ===

    /// Fail the next `fetch_merge_request` calls with these statuses
    pub fn fail_refetch_with(&self, statuses: &[u16]) {
        self.refetch_errors.lock().unwrap().extend(statuses);
    }

    /// Fail the next `request_merge` calls with these statuses
    pub fn fail_request_merge_with(&self, statuses: &[u16]) {
        self.request_merge_errors.lock().unwrap().extend(statuses);
    }

    /// Make `reapprove` fail
    pub fn fail_reapprove(&self, status: u16) {
        *self.error_on_reapprove.lock().unwrap() = Some(status);
    }

    /// Make `approve` fail
    pub fn fail_approve(&self, status: u16) {
        *self.error_on_approve.lock().unwrap() = Some(status);
    }

    /// Make `fetch_project` fail
    pub fn fail_fetch_project(&self, status: u16) {
        *self.error_on_fetch_project.lock().unwrap() = Some(status);
    }

    /// Make `delete_branch` fail
    pub fn fail_delete_branch(&self, status: u16) {
        *self.error_on_delete_branch.lock().unwrap() = Some(status);
    }

    // === Call tracking ===

    /// GitLab serves `approvals` from now on, fully approved
    fn restore_approvals(&self, approvals: Approvals) {
        let approved = Approvals {
            approvals_left: 0,
            ..approvals
        };
        *self.approvals.lock().unwrap() = VecDeque::from([approved]);
    }

    pub fn fetch_approvals_count(&self) -> usize {
        *self.fetch_approvals_calls.lock().unwrap()
    }

    pub fn refetch_count(&self) -> usize {
        *self.refetch_calls.lock().unwrap()
    }

    pub fn request_merge_calls(&self) -> Vec<RequestMergeCall> {
        self.request_merge_calls.lock().unwrap().clone()
    }

    pub fn pipelines_calls(&self) -> Vec<PipelinesCall> {
        self.pipelines_calls.lock().unwrap().clone()
    }

    pub fn create_pipeline_calls(&self) -> Vec<CreatePipelineCall> {
        self.create_pipeline_calls.lock().unwrap().clone()
    }

    pub fn set_assignees_calls(&self) -> Vec<Vec<u64>> {
        self.set_assignees_calls.lock().unwrap().clone()
    }

    pub fn reapprove_calls(&self) -> Vec<Vec<u64>> {
        self.reapprove_calls.lock().unwrap().clone()
    }

    pub fn approve_count(&self) -> usize {
        *self.approve_calls.lock().unwrap()
    }

    /// Bodies of all notes posted (or pre-seeded)
    pub fn comments(&self) -> Vec<String> {
        self.notes
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.body.clone())
            .collect()
    }

    pub fn branch(&self, name: &str) -> Option<String> {
        self.branches.lock().unwrap().get(name).cloned()
    }

    pub fn protected_branches(&self) -> Vec<String> {
        self.protected.lock().unwrap().clone()
    }

    pub fn deleted_branches(&self) -> Vec<String> {
        self.deleted_branches.lock().unwrap().clone()
    }

    pub fn unprotected_branches(&self) -> Vec<String> {
        self.unprotected_branches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangeRequestService for MockPlatform {
    async fn fetch_merge_request(&self, project_id: u64, iid: u64) -> Result<MergeRequest> {
        *self.refetch_calls.lock().unwrap() += 1;
        pop_error(&self.refetch_errors)?;
        self.mr
            .lock()
            .unwrap()
            .clone()
            .filter(|mr| mr.project_id == project_id && mr.iid == iid)
            .ok_or_else(|| Error::api(404, "404 Merge Request Not Found"))
    }

    async fn list_open_assigned_to(
        &self,
        project_id: u64,
        user_id: u64,
    ) -> Result<Vec<MergeRequest>> {
        Ok(self
            .mr
            .lock()
            .unwrap()
            .iter()
            .filter(|mr| mr.project_id == project_id && mr.is_assigned_to(user_id))
            .cloned()
            .collect())
    }

    async fn comment(&self, _mr: &MergeRequest, body: &str) -> Result<()> {
        self.notes.lock().unwrap().push(Note {
            author_id: self.bot_id,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn close(&self, _mr: &MergeRequest) -> Result<()> {
        self.update_mr(|mr| mr.state = MrState::Closed);
        Ok(())
    }

    async fn set_assignees(&self, _mr: &MergeRequest, user_ids: &[u64]) -> Result<()> {
        self.set_assignees_calls
            .lock()
            .unwrap()
            .push(user_ids.to_vec());
        self.update_mr(|mr| mr.assignee_ids = user_ids.to_vec());
        Ok(())
    }

    async fn request_merge(
        &self,
        mr: &MergeRequest,
        expected_sha: &str,
        remove_source_branch: bool,
    ) -> Result<()> {
        self.request_merge_calls
            .lock()
            .unwrap()
            .push(RequestMergeCall {
                iid: mr.iid,
                sha: expected_sha.to_string(),
                remove_source_branch,
            });
        pop_error(&self.request_merge_errors)?;
        if *self.merge_on_accept.lock().unwrap() {
            self.update_mr(|mr| mr.state = MrState::Merged);
        }
        Ok(())
    }

    async fn has_commented_marker(
        &self,
        _mr: &MergeRequest,
        user_id: u64,
        marker: &str,
    ) -> Result<bool> {
        Ok(self
            .notes
            .lock()
            .unwrap()
            .iter()
            .any(|n| n.author_id == user_id && n.body.contains(marker)))
    }
}

#[async_trait]
impl ApprovalService for MockPlatform {
    async fn fetch_approvals(&self, mr: &MergeRequest) -> Result<Approvals> {
        *self.fetch_approvals_calls.lock().unwrap() += 1;
        let mut queue = self.approvals.lock().unwrap();
        let approvals = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(approvals.unwrap_or_else(|| Approvals {
            project_id: mr.project_id,
            iid: mr.iid,
            ..Approvals::default()
        }))
    }

    async fn approve(&self, mr: &MergeRequest) -> Result<()> {
        *self.approve_calls.lock().unwrap() += 1;
        sticky_error(&self.error_on_approve)?;
        self.restore_approvals(Approvals {
            project_id: mr.project_id,
            iid: mr.iid,
            approver_ids: vec![self.bot_id],
            ..Approvals::default()
        });
        Ok(())
    }

    async fn reapprove(&self, _mr: &MergeRequest, approvals: &Approvals) -> Result<()> {
        self.reapprove_calls
            .lock()
            .unwrap()
            .push(approvals.approver_ids.clone());
        sticky_error(&self.error_on_reapprove)?;
        self.restore_approvals(approvals.clone());
        Ok(())
    }
}

#[async_trait]
impl PipelineService for MockPlatform {
    async fn pipelines_by_branch(
        &self,
        project_id: u64,
        branch: &str,
        ref_override: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<Pipeline>> {
        self.pipelines_calls.lock().unwrap().push(PipelinesCall {
            project_id,
            branch: branch.to_string(),
            ref_override: ref_override.map(String::from),
        });
        let wanted_ref = ref_override.unwrap_or(branch);
        Ok(self
            .pipelines
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.project_id == project_id && p.ref_name == wanted_ref)
            .filter(|p| status.is_none_or(|s| p.status.to_string() == s))
            .cloned()
            .collect())
    }

    async fn pipeline_jobs(&self, _pipeline: &Pipeline) -> Result<Vec<PipelineJob>> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn create_pipeline(
        &self,
        project_id: u64,
        ref_name: &str,
        _mr: &MergeRequest,
    ) -> Result<Option<Pipeline>> {
        self.create_pipeline_calls
            .lock()
            .unwrap()
            .push(CreatePipelineCall {
                project_id,
                ref_name: ref_name.to_string(),
            });
        if *self.refuse_pipelines.lock().unwrap() {
            return Ok(None);
        }
        let id = self.next_pipeline_id.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Pipeline {
            id,
            project_id,
            status: marge::types::PipelineStatus::Created,
            ref_name: ref_name.to_string(),
            sha: self
                .mr
                .lock()
                .unwrap()
                .as_ref()
                .map(|mr| mr.sha.clone())
                .unwrap_or_default(),
            created_at: None,
        }))
    }

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        for p in self.pipelines.lock().unwrap().iter_mut() {
            if p.id == pipeline.id {
                p.status = marge::types::PipelineStatus::Canceled;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BranchAdminService for MockPlatform {
    async fn branch_head(&self, _project_id: u64, branch: &str) -> Result<Option<String>> {
        Ok(self.branch(branch))
    }

    async fn create_branch(&self, _project_id: u64, branch: &str, sha: &str) -> Result<()> {
        self.set_branch(branch, sha);
        Ok(())
    }

    async fn protect_branch(&self, _project_id: u64, branch: &str) -> Result<()> {
        self.protected.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    async fn unprotect_branch(&self, _project_id: u64, branch: &str) -> Result<()> {
        self.unprotected_branches
            .lock()
            .unwrap()
            .push(branch.to_string());
        let mut protected = self.protected.lock().unwrap();
        if !protected.iter().any(|b| b == branch) {
            return Err(Error::api(404, "404 Not found"));
        }
        protected.retain(|b| b != branch);
        Ok(())
    }

    async fn delete_branch(&self, _project_id: u64, branch: &str) -> Result<()> {
        self.deleted_branches
            .lock()
            .unwrap()
            .push(branch.to_string());
        sticky_error(&self.error_on_delete_branch)?;
        match self.branches.lock().unwrap().remove(branch) {
            Some(_) => Ok(()),
            None => Err(Error::api(404, "404 Branch Not Found")),
        }
    }
}

#[async_trait]
impl ProjectService for MockPlatform {
    async fn fetch_project(&self, project_id: u64) -> Result<Project> {
        sticky_error(&self.error_on_fetch_project)?;
        self.projects
            .lock()
            .unwrap()
            .get(&project_id)
            .cloned()
            .ok_or_else(|| Error::api(404, "404 Project Not Found"))
    }

    async fn fetch_project_by_path(&self, path: &str) -> Result<Project> {
        self.projects
            .lock()
            .unwrap()
            .values()
            .find(|p| p.path_with_namespace == path)
            .cloned()
            .ok_or_else(|| Error::api(404, "404 Project Not Found"))
    }

    async fn fetch_user(&self, user_id: u64) -> Result<User> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .ok_or_else(|| Error::api(404, "404 User Not Found"))
    }

    async fn current_user(&self) -> Result<User> {
        self.fetch_user(self.bot_id).await
    }
}
