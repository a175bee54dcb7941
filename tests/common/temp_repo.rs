//! Throwaway git remotes for exercising `GitRepo` against real git
//!
//! These are test utilities - not all may be used in every test binary.

#![allow(dead_code)]

use marge::git::{CommitIdentity, GitRepo};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A bare `origin.git` plus a seeding clone used to create history
#[allow(clippy::new_without_default)]
pub struct TempRemote {
    pub dir: TempDir,
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .args(["-c", "user.name=Seeder", "-c", "user.email=seed@example.com"])
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

impl TempRemote {
    /// `main` with one commit, `feature` branching off it with one more
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        git(dir.path(), &["init", "--bare", "-b", "main", "origin.git"]);
        git(dir.path(), &["init", "-b", "main", "seed"]);
        let remote = Self { dir };
        let origin = remote.origin_url();
        git(&remote.seed(), &["remote", "add", "origin", &origin]);
        remote.commit("README", "hello\n", "Initial commit");
        git(&remote.seed(), &["push", "origin", "main"]);
        git(&remote.seed(), &["checkout", "-b", "feature"]);
        remote.commit("feature.txt", "feature\n", "Add feature");
        git(&remote.seed(), &["push", "origin", "feature"]);
        git(&remote.seed(), &["checkout", "main"]);
        remote
    }

    pub fn seed(&self) -> PathBuf {
        self.dir.path().join("seed")
    }

    pub fn origin_url(&self) -> String {
        self.dir.path().join("origin.git").to_string_lossy().into_owned()
    }

    /// Commit `content` to `file` on the seed's current branch
    pub fn commit(&self, file: &str, content: &str, message: &str) {
        std::fs::write(self.seed().join(file), content).expect("failed to write file");
        git(&self.seed(), &["add", file]);
        git(&self.seed(), &["commit", "-m", message]);
    }

    /// Commit on `branch` and push it
    pub fn commit_and_push(&self, branch: &str, file: &str, content: &str, message: &str) {
        git(&self.seed(), &["checkout", branch]);
        self.commit(file, content, message);
        git(&self.seed(), &["push", "origin", branch]);
        git(&self.seed(), &["checkout", "main"]);
    }

    /// Head of `branch` in the bare remote
    pub fn remote_head(&self, branch: &str) -> String {
        git(&self.dir.path().join("origin.git"), &["rev-parse", branch])
    }

    /// Message of `rev` as seen by the bare remote
    pub fn remote_message(&self, rev: &str) -> String {
        git(
            &self.dir.path().join("origin.git"),
            &["log", "-1", "--format=%B", rev],
        )
    }

    /// A `GitRepo` cloning the remote into `work/`
    pub fn worktree(&self) -> GitRepo {
        let repo = GitRepo::new(
            self.dir.path().join("work"),
            self.origin_url(),
            "main",
            CommitIdentity {
                name: "Marge Bot".to_string(),
                email: "marge@example.com".to_string(),
            },
            None,
        );
        repo.clone_if_missing().expect("failed to clone");
        repo
    }
}
