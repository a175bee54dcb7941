//! Shared bot context
//!
//! Built once at startup: the GitLab service, the bot user and the watched
//! projects. Clones are opened per project when it is processed.

use crate::cli::Settings;
use marge::auth::{get_gitlab_auth, test_gitlab_auth};
use marge::error::{Error, Result};
use marge::git::{CommitIdentity, GitRepo};
use marge::platform::{GitLabService, ProjectService};
use marge::types::{Project, User};
use tracing::info;

/// Branch assumed when GitLab reports none (empty repository)
const FALLBACK_DEFAULT_BRANCH: &str = "main";

/// Context shared by every pass over the projects
pub struct BotContext {
    /// GitLab service
    pub platform: GitLabService,
    /// The bot user the token belongs to
    pub user: User,
    /// Watched projects, resolved from their paths
    pub projects: Vec<Project>,
    /// Validated settings
    pub settings: Settings,
}

impl BotContext {
    /// Authenticate and resolve the watched projects
    pub async fn new(settings: Settings) -> Result<Self> {
        let auth = get_gitlab_auth(
            settings.auth_token.as_deref(),
            settings.auth_token_file.as_deref(),
        )?;
        let platform = GitLabService::new(auth.token, &settings.gitlab_url)?;
        let user = test_gitlab_auth(&platform).await?;
        info!(username = %user.username, source = ?auth.source, "logged in");

        let mut projects = Vec::with_capacity(settings.projects.len());
        for path in &settings.projects {
            let project = platform.fetch_project_by_path(path).await.map_err(|e| {
                if e.is_not_found() {
                    Error::Config(format!("project `{path}` not found or not accessible"))
                } else {
                    e
                }
            })?;
            projects.push(project);
        }

        Ok(Self {
            platform,
            user,
            projects,
            settings,
        })
    }

    /// Local clone of `project`, cloned on first use
    pub fn worktree_for(&self, project: &Project) -> Result<GitRepo> {
        let identity = CommitIdentity {
            name: self.user.name.clone(),
            email: self
                .user
                .email
                .clone()
                .unwrap_or_else(|| format!("{}@users.noreply", self.user.username)),
        };
        let repo = GitRepo::new(
            self.settings.repo_dir.join(&project.path_with_namespace),
            project.ssh_url_to_repo.clone(),
            project
                .default_branch
                .clone()
                .unwrap_or_else(|| FALLBACK_DEFAULT_BRANCH.to_string()),
            identity,
            self.settings.ssh_key_file.clone(),
        );
        repo.clone_if_missing()?;
        Ok(repo)
    }
}
