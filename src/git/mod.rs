//! Local git operations
//!
//! The merge workflow only sees the [`Worktree`] trait. [`GitRepo`] implements
//! it by running `git` in a local clone with a clean environment: no system
//! or user config, no terminal prompts, identity passed per command.
//!
//! Conventions: the target project is the `origin` remote; when the source
//! branch lives in a fork, that fork is fetched as the `source` remote.

pub mod trailer;

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::options::Fusion;

/// Remote name of the target project
pub const ORIGIN: &str = "origin";

/// Remote name of a fork holding the source branch
pub const SOURCE: &str = "source";

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed {
        /// The command line that failed
        command: String,
        /// What git printed on stderr
        stderr: String,
    },

    /// Rebase or merge stopped on conflicts.
    #[error("{strategy} conflict: {details}")]
    Conflict {
        /// Which fusion hit the conflict
        strategy: Fusion,
        /// Git's output
        details: String,
    },

    /// A call that violates the worktree's preconditions.
    #[error("invalid git operation: {0}")]
    Usage(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// The local repository the merge workflow rewrites and pushes from.
///
/// Exclusively owned by one merge job at a time.
pub trait Worktree: Send + Sync {
    /// URL of the `origin` remote
    fn remote_url(&self) -> &str;

    /// Branch the worktree falls back to after a job (never deleted)
    fn default_branch(&self) -> &str;

    /// Fetch `remote_name`, registering or updating its URL when given
    fn fetch(&self, remote_name: &str, remote_url: Option<&str>) -> GitResult<()>;

    /// Replay `branch` onto `origin/<new_base>`; returns the new head
    fn rebase(
        &self,
        branch: &str,
        new_base: &str,
        source_repo_url: Option<&str>,
        local: bool,
    ) -> GitResult<String>;

    /// Merge `origin/<target_branch>` into `branch`; returns the new head
    fn merge(
        &self,
        branch: &str,
        target_branch: &str,
        source_repo_url: Option<&str>,
        local: bool,
    ) -> GitResult<String>;

    /// Rewrite every commit in `start_commit..branch` so its message carries
    /// `trailer_name: value` for each value; returns the new head
    fn tag_with_trailer(
        &self,
        trailer_name: &str,
        trailer_values: &[String],
        branch: &str,
        start_commit: &str,
    ) -> GitResult<String>;

    /// Push `branch` to `origin` (or `source` when a fork URL is given)
    fn push(
        &self,
        branch: &str,
        source_repo_url: Option<&str>,
        force: bool,
        push_option: Option<&str>,
    ) -> GitResult<()>;

    /// Resolve `rev` to a full sha
    fn get_commit_hash(&self, rev: &str) -> GitResult<String>;

    /// `git checkout -B branch [start_point]`
    fn checkout_branch(&self, branch: &str, start_point: Option<&str>) -> GitResult<()>;

    /// Switch to the default branch and delete `branch` locally
    fn remove_branch(&self, branch: &str) -> GitResult<()>;
}

/// Identity used for creating commits.
///
/// Passed via `-c` flags so commits can be created with global config
/// disabled.
#[derive(Debug, Clone)]
pub struct CommitIdentity {
    /// The committer name (git `user.name`).
    pub name: String,
    /// The committer email (git `user.email`).
    pub email: String,
}

/// A local clone driven through the `git` binary
#[derive(Debug, Clone)]
pub struct GitRepo {
    local_path: PathBuf,
    remote_url: String,
    default_branch: String,
    identity: CommitIdentity,
    ssh_key_file: Option<PathBuf>,
}

impl GitRepo {
    /// Wrap an existing (or soon to be cloned) local repository
    pub fn new(
        local_path: impl Into<PathBuf>,
        remote_url: impl Into<String>,
        default_branch: impl Into<String>,
        identity: CommitIdentity,
        ssh_key_file: Option<PathBuf>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_url: remote_url.into(),
            default_branch: default_branch.into(),
            identity,
            ssh_key_file,
        }
    }

    /// Path of the working tree
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Clone `remote_url` into `local_path` unless a repository is already there
    pub fn clone_if_missing(&self) -> GitResult<()> {
        if self.local_path.join(".git").exists() {
            debug!(path = %self.local_path.display(), "reusing existing clone");
            return Ok(());
        }
        if let Some(parent) = self.local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(url = %self.remote_url, path = %self.local_path.display(), "cloning");
        let path = self.local_path.to_string_lossy().into_owned();
        let parent = self
            .local_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let output = self
            .base_command(&parent)
            .args(["clone", "--origin", ORIGIN, &self.remote_url, &path])
            .output()?;
        check_output(&output, &["clone", &self.remote_url, &path])?;
        Ok(())
    }

    /// Create a git Command with a clean environment (no system/user config).
    fn base_command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(workdir);
        cmd.env("GIT_CONFIG_NOSYSTEM", "1");
        cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        if let Some(key) = &self.ssh_key_file {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i '{}' -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
                    key.display()
                ),
            );
        }
        cmd.arg("-c");
        cmd.arg(format!("user.name={}", self.identity.name));
        cmd.arg("-c");
        cmd.arg(format!("user.email={}", self.identity.email));
        cmd
    }

    fn git(&self, args: &[&str]) -> GitResult<Output> {
        debug!(args = ?args, "git");
        let output = self.base_command(&self.local_path).args(args).output()?;
        check_output(&output, args)?;
        Ok(output)
    }

    fn git_stdout(&self, args: &[&str]) -> GitResult<String> {
        let output = self.git(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Commit message exactly as stored, trailing newline included
    fn raw_message(&self, commit: &str) -> GitResult<String> {
        let output = self.git(&["cat-file", "commit", commit])?;
        let object = String::from_utf8_lossy(&output.stdout);
        Ok(object
            .split_once("\n\n")
            .map(|(_, message)| message.to_string())
            .unwrap_or_default())
    }

    fn git_with_input(
        &self,
        args: &[&str],
        env: &[(&str, &str)],
        input: &str,
    ) -> GitResult<String> {
        let mut cmd = self.base_command(&self.local_path);
        cmd.args(args)
            .envs(env.iter().copied())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        check_output(&output, args)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn fuse(
        &self,
        strategy: Fusion,
        branch: &str,
        target_branch: &str,
        source_repo_url: Option<&str>,
        local: bool,
    ) -> GitResult<String> {
        if source_repo_url.is_none() && branch == target_branch {
            return Err(GitError::Usage(format!(
                "cannot {strategy} `{branch}` onto itself"
            )));
        }

        if !local {
            self.fetch(ORIGIN, None)?;
            if let Some(url) = source_repo_url {
                self.fetch(SOURCE, Some(url))?;
            }
        }

        let remote = if source_repo_url.is_some() { SOURCE } else { ORIGIN };
        self.checkout_branch(branch, Some(&format!("{remote}/{branch}")))?;

        let target = format!("{ORIGIN}/{target_branch}");
        let attempt = match strategy {
            Fusion::Rebase => self.git(&["rebase", &target]),
            Fusion::Merge => self.git(&["merge", "--no-edit", &target]),
        };
        if let Err(err) = attempt {
            warn!(branch, target = %target, %strategy, "fusion failed, aborting");
            let abort = match strategy {
                Fusion::Rebase => self.git(&["rebase", "--abort"]),
                Fusion::Merge => self.git(&["merge", "--abort"]),
            };
            if let Err(abort_err) = abort {
                debug!(error = %abort_err, "nothing to abort");
            }
            return Err(match err {
                GitError::CommandFailed { stderr, .. } => GitError::Conflict {
                    strategy,
                    details: stderr,
                },
                other => other,
            });
        }

        self.get_commit_hash("HEAD")
    }
}

fn check_output(output: &Output, args: &[&str]) -> GitResult<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Metadata of one commit, as printed by `git show -s --format=...`
struct CommitInfo {
    tree: String,
    parents: Vec<String>,
    author_name: String,
    author_email: String,
    author_date: String,
    committer_name: String,
    committer_email: String,
    committer_date: String,
}

const COMMIT_INFO_FORMAT: &str = "--format=%T%x00%P%x00%an%x00%ae%x00%aI%x00%cn%x00%ce%x00%cI";

impl CommitInfo {
    fn parse(raw: &str) -> GitResult<Self> {
        let fields: Vec<&str> = raw.split('\0').collect();
        let [tree, parents, an, ae, ad, cn, ce, cd] = fields.as_slice() else {
            return Err(GitError::Usage(format!("unexpected commit metadata: {raw:?}")));
        };
        Ok(Self {
            tree: (*tree).to_string(),
            parents: parents.split_whitespace().map(String::from).collect(),
            author_name: (*an).to_string(),
            author_email: (*ae).to_string(),
            author_date: (*ad).to_string(),
            committer_name: (*cn).to_string(),
            committer_email: (*ce).to_string(),
            committer_date: (*cd).to_string(),
        })
    }
}

impl Worktree for GitRepo {
    fn remote_url(&self) -> &str {
        &self.remote_url
    }

    fn default_branch(&self) -> &str {
        &self.default_branch
    }

    fn fetch(&self, remote_name: &str, remote_url: Option<&str>) -> GitResult<()> {
        if let Some(url) = remote_url {
            let known = self.git(&["remote", "get-url", remote_name]).is_ok();
            if known {
                self.git(&["remote", "set-url", remote_name, url])?;
            } else {
                self.git(&["remote", "add", remote_name, url])?;
            }
        }
        self.git(&["fetch", "--prune", remote_name])?;
        Ok(())
    }

    fn rebase(
        &self,
        branch: &str,
        new_base: &str,
        source_repo_url: Option<&str>,
        local: bool,
    ) -> GitResult<String> {
        self.fuse(Fusion::Rebase, branch, new_base, source_repo_url, local)
    }

    fn merge(
        &self,
        branch: &str,
        target_branch: &str,
        source_repo_url: Option<&str>,
        local: bool,
    ) -> GitResult<String> {
        self.fuse(Fusion::Merge, branch, target_branch, source_repo_url, local)
    }

    fn tag_with_trailer(
        &self,
        trailer_name: &str,
        trailer_values: &[String],
        branch: &str,
        start_commit: &str,
    ) -> GitResult<String> {
        if trailer_values.is_empty() {
            return self.get_commit_hash(branch);
        }
        let range = format!("{start_commit}..{branch}");
        let listing = self.git_stdout(&["rev-list", "--reverse", "--topo-order", &range])?;
        let commits: Vec<&str> = listing.lines().filter(|l| !l.is_empty()).collect();
        debug!(branch, range = %range, count = commits.len(), trailer_name, "rewriting commits");

        let mut rewritten: HashMap<String, String> = HashMap::new();
        let mut new_tip = None;
        for commit in &commits {
            let info = CommitInfo::parse(
                &self.git_stdout(&["show", "-s", COMMIT_INFO_FORMAT, commit])?,
            )?;
            let original = self.raw_message(commit)?;
            let message = trailer::with_trailer(&original, trailer_name, trailer_values);

            let parents: Vec<String> = info
                .parents
                .iter()
                .map(|p| rewritten.get(p).cloned().unwrap_or_else(|| p.clone()))
                .collect();
            if message == original && parents == info.parents {
                new_tip = Some((*commit).to_string());
                continue;
            }
            let mut args = vec!["commit-tree", info.tree.as_str()];
            for parent in &parents {
                args.push("-p");
                args.push(parent);
            }
            args.extend(["-F", "-"]);
            let env = [
                ("GIT_AUTHOR_NAME", info.author_name.as_str()),
                ("GIT_AUTHOR_EMAIL", info.author_email.as_str()),
                ("GIT_AUTHOR_DATE", info.author_date.as_str()),
                ("GIT_COMMITTER_NAME", info.committer_name.as_str()),
                ("GIT_COMMITTER_EMAIL", info.committer_email.as_str()),
                ("GIT_COMMITTER_DATE", info.committer_date.as_str()),
            ];
            let new_sha = self.git_with_input(&args, &env, &message)?;
            rewritten.insert((*commit).to_string(), new_sha.clone());
            new_tip = Some(new_sha);
        }

        match new_tip {
            Some(tip) => {
                self.checkout_branch(branch, Some(&tip))?;
                Ok(tip)
            }
            None => self.get_commit_hash(branch),
        }
    }

    fn push(
        &self,
        branch: &str,
        source_repo_url: Option<&str>,
        force: bool,
        push_option: Option<&str>,
    ) -> GitResult<()> {
        let remote = if source_repo_url.is_some() { SOURCE } else { ORIGIN };
        let refspec = format!("{branch}:{branch}");
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        if let Some(option) = push_option {
            args.push("-o");
            args.push(option);
        }
        args.push(remote);
        args.push(&refspec);
        info!(branch, remote, force, "pushing");
        self.git(&args)?;
        Ok(())
    }

    fn get_commit_hash(&self, rev: &str) -> GitResult<String> {
        self.git_stdout(&["rev-parse", rev])
    }

    fn checkout_branch(&self, branch: &str, start_point: Option<&str>) -> GitResult<()> {
        let mut args = vec!["checkout", "-B", branch];
        if let Some(start) = start_point {
            args.push(start);
        }
        args.push("--");
        self.git(&args)?;
        Ok(())
    }

    fn remove_branch(&self, branch: &str) -> GitResult<()> {
        if branch == self.default_branch {
            return Err(GitError::Usage(format!(
                "refusing to delete the default branch `{branch}`"
            )));
        }
        self.git(&["checkout", &self.default_branch, "--"])?;
        self.git(&["branch", "-D", branch])?;
        Ok(())
    }
}
