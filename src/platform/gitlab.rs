//! GitLab platform service implementation

use crate::error::{Error, Result};
use crate::platform::{
    ApprovalService, BranchAdminService, ChangeRequestService, PipelineService, ProjectService,
};
use crate::types::{
    Approvals, MergeRequest, MrState, Pipeline, PipelineJob, PipelineStatus,
    Project, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Page size for list endpoints
const PER_PAGE: usize = 100;

/// GitLab service using reqwest
pub struct GitLabService {
    client: Client,
    token: String,
    base_url: String,
}

#[derive(Deserialize)]
struct UserRef {
    id: u64,
    #[serde(default)]
    username: String,
}

#[derive(Deserialize)]
struct WireMergeRequest {
    id: u64,
    iid: u64,
    project_id: u64,
    title: String,
    state: String,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    sha: Option<String>,
    source_project_id: u64,
    target_project_id: u64,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    squash: Option<bool>,
    #[serde(default)]
    assignees: Option<Vec<UserRef>>,
    #[serde(default)]
    assignee: Option<UserRef>,
    author: UserRef,
    web_url: String,
}

impl From<WireMergeRequest> for MergeRequest {
    fn from(mr: WireMergeRequest) -> Self {
        let mut assignee_ids: Vec<u64> = mr
            .assignees
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.id)
            .collect();
        // older GitLab versions only report a single assignee
        if let Some(single) = mr.assignee {
            if !assignee_ids.contains(&single.id) {
                assignee_ids.push(single.id);
            }
        }
        Self {
            id: mr.id,
            iid: mr.iid,
            project_id: mr.project_id,
            title: mr.title,
            state: MrState::parse(&mr.state),
            source_branch: mr.source_branch,
            target_branch: mr.target_branch,
            sha: mr.sha.unwrap_or_default(),
            source_project_id: mr.source_project_id,
            target_project_id: mr.target_project_id,
            work_in_progress: mr.draft || mr.work_in_progress,
            // missing means auto-squash is not supported
            squash: mr.squash.unwrap_or(false),
            assignee_ids,
            author_id: mr.author.id,
            web_url: mr.web_url,
        }
    }
}

#[derive(Deserialize)]
struct WireNote {
    body: String,
    author: UserRef,
    #[serde(default)]
    system: bool,
}

#[derive(Deserialize)]
struct WireApprover {
    user: UserRef,
}

#[derive(Deserialize)]
struct WireApprovals {
    #[serde(default)]
    approvals_left: u32,
    #[serde(default)]
    approved_by: Vec<WireApprover>,
}

#[derive(Deserialize)]
struct WirePipeline {
    id: u64,
    status: String,
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl WirePipeline {
    fn into_pipeline(self, project_id: u64) -> Pipeline {
        Pipeline {
            id: self.id,
            project_id,
            status: PipelineStatus::parse(&self.status),
            ref_name: self.ref_name,
            sha: self.sha,
            created_at: self.created_at,
        }
    }
}

#[derive(Deserialize)]
struct WireJob {
    id: u64,
    name: String,
    status: String,
}

#[derive(Deserialize)]
struct WireCommit {
    id: String,
}

#[derive(Deserialize)]
struct WireBranch {
    commit: WireCommit,
}

#[derive(Deserialize)]
struct WireProject {
    id: u64,
    path_with_namespace: String,
    ssh_url_to_repo: String,
    http_url_to_repo: String,
    #[serde(default)]
    only_allow_merge_if_pipeline_succeeds: bool,
    #[serde(default)]
    default_branch: Option<String>,
}

impl From<WireProject> for Project {
    fn from(p: WireProject) -> Self {
        Self {
            id: p.id,
            path_with_namespace: p.path_with_namespace,
            ssh_url_to_repo: p.ssh_url_to_repo,
            http_url_to_repo: p.http_url_to_repo,
            only_allow_merge_if_pipeline_succeeds: p.only_allow_merge_if_pipeline_succeeds,
            default_branch: p.default_branch,
        }
    }
}

#[derive(Deserialize)]
struct WireUser {
    id: u64,
    username: String,
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    public_email: Option<String>,
}

impl From<WireUser> for User {
    fn from(u: WireUser) -> Self {
        let email = u
            .email
            .or(u.public_email)
            .filter(|e| !e.trim().is_empty());
        Self {
            id: u.id,
            username: u.username,
            name: u.name,
            email,
        }
    }
}

impl GitLabService {
    /// Create a new GitLab service for `base_url` (e.g. `https://gitlab.com`)
    pub fn new(token: String, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Platform(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    fn mr_url(&self, mr: &MergeRequest, suffix: &str) -> String {
        self.api_url(&format!(
            "/projects/{}/merge_requests/{}{}",
            mr.project_id, mr.iid, suffix
        ))
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }

    /// Turn non-success statuses into `Error::GitLabApi`, keeping the body
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(Error::api(status.as_u16(), format!("{url}: {body}")))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = Self::check(self.authed(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        Self::check(self.authed(request).send().await?).await?;
        Ok(())
    }

    /// GET every page of a list endpoint
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        for page in 1.. {
            let request = self
                .client
                .get(url)
                .query(query)
                .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
            let items: Vec<T> = self.send(request).await?;
            let done = items.len() < PER_PAGE;
            all.extend(items);
            if done {
                break;
            }
        }
        Ok(all)
    }
}

#[async_trait]
impl ChangeRequestService for GitLabService {
    async fn fetch_merge_request(&self, project_id: u64, iid: u64) -> Result<MergeRequest> {
        debug!(project_id, mr_iid = iid, "fetching MR");
        let url = self.api_url(&format!("/projects/{project_id}/merge_requests/{iid}"));
        let mr: WireMergeRequest = self.send(self.client.get(&url)).await?;
        Ok(mr.into())
    }

    async fn list_open_assigned_to(
        &self,
        project_id: u64,
        user_id: u64,
    ) -> Result<Vec<MergeRequest>> {
        debug!(project_id, user_id, "listing assigned MRs");
        let url = self.api_url(&format!("/projects/{project_id}/merge_requests"));
        let query = [
            ("state", "opened".to_string()),
            ("order_by", "created_at".to_string()),
            ("sort", "asc".to_string()),
        ];
        let mrs: Vec<WireMergeRequest> = self.get_all_pages(&url, &query).await?;
        let mine: Vec<MergeRequest> = mrs
            .into_iter()
            .map(MergeRequest::from)
            .filter(|mr| mr.is_assigned_to(user_id))
            .collect();
        debug!(project_id, count = mine.len(), "listed assigned MRs");
        Ok(mine)
    }

    async fn comment(&self, mr: &MergeRequest, body: &str) -> Result<()> {
        debug!(mr_iid = mr.iid, "creating MR comment");
        let url = self.mr_url(mr, "/notes");
        self.send_empty(
            self.client
                .post(&url)
                .json(&serde_json::json!({ "body": body })),
        )
        .await
    }

    async fn close(&self, mr: &MergeRequest) -> Result<()> {
        debug!(mr_iid = mr.iid, "closing MR");
        let url = self.mr_url(mr, "");
        self.send_empty(
            self.client
                .put(&url)
                .json(&serde_json::json!({ "state_event": "close" })),
        )
        .await
    }

    async fn set_assignees(&self, mr: &MergeRequest, user_ids: &[u64]) -> Result<()> {
        debug!(mr_iid = mr.iid, ?user_ids, "setting assignees");
        let url = self.mr_url(mr, "");
        // an empty list would be ignored by GitLab; `0` clears the assignees
        let ids: Vec<u64> = if user_ids.is_empty() {
            vec![0]
        } else {
            user_ids.to_vec()
        };
        self.send_empty(
            self.client
                .put(&url)
                .json(&serde_json::json!({ "assignee_ids": ids })),
        )
        .await
    }

    async fn request_merge(
        &self,
        mr: &MergeRequest,
        expected_sha: &str,
        remove_source_branch: bool,
    ) -> Result<()> {
        debug!(mr_iid = mr.iid, expected_sha, "accepting MR");
        let url = self.mr_url(mr, "/merge");
        self.send_empty(self.client.put(&url).json(&serde_json::json!({
            "should_remove_source_branch": remove_source_branch,
            "merge_when_pipeline_succeeds": true,
            "sha": expected_sha,
        })))
        .await
    }

    async fn has_commented_marker(
        &self,
        mr: &MergeRequest,
        user_id: u64,
        marker: &str,
    ) -> Result<bool> {
        let url = self.mr_url(mr, "/notes");
        let notes: Vec<WireNote> = self.get_all_pages(&url, &[]).await?;
        let found = notes
            .iter()
            .filter(|n| !n.system && n.author.id == user_id)
            .any(|n| n.body.contains(marker));
        debug!(mr_iid = mr.iid, found, "checked for marker comment");
        Ok(found)
    }
}

#[async_trait]
impl ApprovalService for GitLabService {
    async fn fetch_approvals(&self, mr: &MergeRequest) -> Result<Approvals> {
        let url = self.mr_url(mr, "/approvals");
        let approvals: WireApprovals = self.send(self.client.get(&url)).await?;
        let (approver_ids, approver_usernames) = approvals
            .approved_by
            .into_iter()
            .map(|a| (a.user.id, a.user.username))
            .unzip();
        Ok(Approvals {
            project_id: mr.project_id,
            iid: mr.iid,
            approver_usernames,
            approver_ids,
            approvals_left: approvals.approvals_left,
        })
    }

    async fn approve(&self, mr: &MergeRequest) -> Result<()> {
        debug!(mr_iid = mr.iid, "approving MR");
        let url = self.mr_url(mr, "/approve");
        self.send_empty(self.client.post(&url).json(&serde_json::json!({ "sha": mr.sha })))
            .await
    }

    async fn reapprove(&self, mr: &MergeRequest, approvals: &Approvals) -> Result<()> {
        let url = self.mr_url(mr, "/approve");
        for user_id in &approvals.approver_ids {
            debug!(mr_iid = mr.iid, user_id, "re-approving on behalf of user");
            self.send_empty(
                self.client
                    .post(&url)
                    .header("Sudo", user_id.to_string())
                    .json(&serde_json::json!({ "sha": mr.sha })),
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineService for GitLabService {
    async fn pipelines_by_branch(
        &self,
        project_id: u64,
        branch: &str,
        ref_override: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<Pipeline>> {
        let mut query = vec![
            ("ref", ref_override.unwrap_or(branch).to_string()),
            ("order_by", "id".to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        let url = self.api_url(&format!("/projects/{project_id}/pipelines"));
        let pipelines: Vec<WirePipeline> = self.send(self.client.get(&url).query(&query)).await?;
        debug!(project_id, branch, count = pipelines.len(), "listed pipelines");
        Ok(pipelines
            .into_iter()
            .map(|p| p.into_pipeline(project_id))
            .collect())
    }

    async fn pipeline_jobs(&self, pipeline: &Pipeline) -> Result<Vec<PipelineJob>> {
        let url = self.api_url(&format!(
            "/projects/{}/pipelines/{}/jobs",
            pipeline.project_id, pipeline.id
        ));
        let jobs: Vec<WireJob> = self.get_all_pages(&url, &[]).await?;
        Ok(jobs
            .into_iter()
            .map(|j| PipelineJob {
                id: j.id,
                name: j.name,
                status: j.status,
            })
            .collect())
    }

    async fn create_pipeline(
        &self,
        project_id: u64,
        ref_name: &str,
        mr: &MergeRequest,
    ) -> Result<Option<Pipeline>> {
        let request = if mr.source_project_id == project_id && mr.source_branch == ref_name {
            self.client.post(self.api_url(&format!(
                "/projects/{project_id}/merge_requests/{}/pipelines",
                mr.iid
            )))
        } else {
            self.client
                .post(self.api_url(&format!("/projects/{project_id}/pipeline")))
                .query(&[("ref", ref_name)])
        };
        match self.send::<WirePipeline>(request).await {
            Ok(pipeline) => Ok(Some(pipeline.into_pipeline(project_id))),
            Err(err @ Error::GitLabApi { .. }) => {
                warn!(project_id, ref_name, error = %err, "GitLab refused to create a pipeline");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn cancel_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        let url = self.api_url(&format!(
            "/projects/{}/pipelines/{}/cancel",
            pipeline.project_id, pipeline.id
        ));
        self.send_empty(self.client.post(&url)).await
    }
}

#[async_trait]
impl BranchAdminService for GitLabService {
    async fn branch_head(&self, project_id: u64, branch: &str) -> Result<Option<String>> {
        let url = self.api_url(&format!(
            "/projects/{project_id}/repository/branches/{}",
            urlencoding::encode(branch)
        ));
        match self.send::<WireBranch>(self.client.get(&url)).await {
            Ok(b) => Ok(Some(b.commit.id)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_branch(&self, project_id: u64, branch: &str, sha: &str) -> Result<()> {
        debug!(project_id, branch, sha, "creating branch");
        let url = self.api_url(&format!("/projects/{project_id}/repository/branches"));
        self.send_empty(self.client.post(&url).query(&[("branch", branch), ("ref", sha)]))
            .await
    }

    async fn protect_branch(&self, project_id: u64, branch: &str) -> Result<()> {
        debug!(project_id, branch, "protecting branch");
        let url = self.api_url(&format!("/projects/{project_id}/protected_branches"));
        self.send_empty(self.client.post(&url).query(&[
            ("name", branch),
            ("push_access_level", "40"),
            ("merge_access_level", "40"),
        ]))
        .await
    }

    async fn unprotect_branch(&self, project_id: u64, branch: &str) -> Result<()> {
        debug!(project_id, branch, "unprotecting branch");
        let url = self.api_url(&format!(
            "/projects/{project_id}/protected_branches/{}",
            urlencoding::encode(branch)
        ));
        self.send_empty(self.client.delete(&url)).await
    }

    async fn delete_branch(&self, project_id: u64, branch: &str) -> Result<()> {
        debug!(project_id, branch, "deleting branch");
        let url = self.api_url(&format!(
            "/projects/{project_id}/repository/branches/{}",
            urlencoding::encode(branch)
        ));
        self.send_empty(self.client.delete(&url)).await
    }
}

#[async_trait]
impl ProjectService for GitLabService {
    async fn fetch_project(&self, project_id: u64) -> Result<Project> {
        let url = self.api_url(&format!("/projects/{project_id}"));
        let project: WireProject = self.send(self.client.get(&url)).await?;
        Ok(project.into())
    }

    async fn fetch_project_by_path(&self, path: &str) -> Result<Project> {
        let url = self.api_url(&format!("/projects/{}", urlencoding::encode(path)));
        let project: WireProject = self.send(self.client.get(&url)).await?;
        Ok(project.into())
    }

    async fn fetch_user(&self, user_id: u64) -> Result<User> {
        let url = self.api_url(&format!("/users/{user_id}"));
        let user: WireUser = self.send(self.client.get(&url)).await?;
        Ok(user.into())
    }

    async fn current_user(&self) -> Result<User> {
        let user: WireUser = self.send(self.client.get(self.api_url("/user"))).await?;
        Ok(user.into())
    }
}
