//! Shared test fixtures
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

pub mod fake_clock;
pub mod mock_platform;
pub mod temp_repo;

pub use fake_clock::FakeClock;
pub use mock_platform::MockPlatform;
pub use mock_worktree::{FailAt, MockWorktree};
pub use temp_repo::TempRemote;

use marge::merge::{JobContext, MergeJob};
use marge::options::JobOptions;
use marge::types::{
    Approvals, MergeRequest, MrState, Pipeline, PipelineJob, PipelineStatus, Project, User,
};

pub const BOT_ID: u64 = 99;
pub const AUTHOR_ID: u64 = 5;
pub const PROJECT_ID: u64 = 1234;
pub const FORK_ID: u64 = 4321;

pub const TARGET_SHA: &str = "1111111111111111111111111111111111111111";
pub const OLD_SOURCE_SHA: &str = "2222222222222222222222222222222222222222";
pub const FUSED_SHA: &str = "3333333333333333333333333333333333333333";

pub fn bot_user() -> User {
    User {
        id: BOT_ID,
        username: "marge-bot".to_string(),
        name: "Marge Bot".to_string(),
        email: Some("marge@example.com".to_string()),
    }
}

pub fn make_user(id: u64, username: &str) -> User {
    User {
        id,
        username: username.to_string(),
        name: format!("{username} Name"),
        email: Some(format!("{username}@example.com")),
    }
}

pub fn make_project(id: u64, path: &str) -> Project {
    Project {
        id,
        path_with_namespace: path.to_string(),
        ssh_url_to_repo: format!("git@gitlab.example.com:{path}.git"),
        http_url_to_repo: format!("https://gitlab.example.com/{path}.git"),
        only_allow_merge_if_pipeline_succeeds: true,
        default_branch: Some("main".to_string()),
    }
}

/// Open MR !7 from `feature` into `main`, assigned to the bot
pub fn make_mr() -> MergeRequest {
    MergeRequest {
        id: 70,
        iid: 7,
        project_id: PROJECT_ID,
        title: "Add a feature".to_string(),
        state: MrState::Opened,
        source_branch: "feature".to_string(),
        target_branch: "main".to_string(),
        sha: OLD_SOURCE_SHA.to_string(),
        source_project_id: PROJECT_ID,
        target_project_id: PROJECT_ID,
        work_in_progress: false,
        squash: false,
        assignee_ids: vec![BOT_ID],
        author_id: AUTHOR_ID,
        web_url: "https://gitlab.example.com/group/app/-/merge_requests/7".to_string(),
    }
}

pub fn approved_by(users: &[&User]) -> Approvals {
    Approvals {
        project_id: PROJECT_ID,
        iid: 7,
        approver_usernames: users.iter().map(|u| u.username.clone()).collect(),
        approver_ids: users.iter().map(|u| u.id).collect(),
        approvals_left: 0,
    }
}

pub fn missing_approvals(left: u32) -> Approvals {
    Approvals {
        project_id: PROJECT_ID,
        iid: 7,
        approvals_left: left,
        ..Approvals::default()
    }
}

pub fn make_pipeline(id: u64, ref_name: &str, sha: &str, status: PipelineStatus) -> Pipeline {
    Pipeline {
        id,
        project_id: PROJECT_ID,
        status,
        ref_name: ref_name.to_string(),
        sha: sha.to_string(),
        created_at: None,
    }
}

pub fn make_job(name: &str) -> PipelineJob {
    PipelineJob {
        id: 1,
        name: name.to_string(),
        status: "success".to_string(),
    }
}

/// Everything a merge job borrows, owned in one place
pub struct Fixture {
    pub platform: MockPlatform,
    pub repo: MockWorktree,
    pub clock: FakeClock,
    pub user: User,
    pub project: Project,
    pub options: JobOptions,
}

impl Fixture {
    /// A mergeable MR whose rebase produces `FUSED_SHA`
    ///
    /// The MR is approved, its target project requires green pipelines,
    /// and a successful MR pipeline exists for the pushed commit.
    pub fn mergeable(options: JobOptions) -> Self {
        let project = make_project(PROJECT_ID, "group/app");
        let platform = MockPlatform::new(BOT_ID);
        platform.add_user(bot_user());
        platform.add_project(project.clone());
        platform.set_mr(MergeRequest {
            sha: FUSED_SHA.to_string(),
            ..make_mr()
        });
        platform.set_approvals(vec![approved_by(&[&make_user(11, "alice")])]);
        platform.set_pipelines(vec![make_pipeline(
            500,
            "refs/merge-requests/7/head",
            FUSED_SHA,
            PipelineStatus::Success,
        )]);
        platform.set_jobs(vec![make_job("test")]);
        platform.set_branch("main", TARGET_SHA);

        let repo = MockWorktree::new(&project.ssh_url_to_repo);
        repo.set_fused_sha(FUSED_SHA);
        repo.set_ref("origin/main", TARGET_SHA);
        repo.set_ref("origin/feature", OLD_SOURCE_SHA);

        Self {
            platform,
            repo,
            clock: FakeClock::new(),
            user: bot_user(),
            project,
            options,
        }
    }

    pub fn job(&self) -> MergeJob<'_> {
        MergeJob::new(JobContext {
            platform: &self.platform,
            repo: &self.repo,
            clock: &self.clock,
            user: &self.user,
            project: &self.project,
            options: &self.options,
        })
    }
}
