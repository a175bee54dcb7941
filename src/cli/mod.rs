//! Command line interface

pub mod context;
pub mod merge;

use clap::Parser;
use marge::config::{Config, compile_regex};
use marge::error::{Error, Result};
use marge::options::JobOptions;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

/// marge - merges GitLab merge requests once they are approved and green
#[derive(Parser, Debug, Default)]
#[command(name = "marge")]
#[command(version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Base URL of the GitLab instance, e.g. https://gitlab.com
    #[arg(long, env = "MARGE_GITLAB_URL")]
    pub gitlab_url: Option<String>,

    /// API token of the bot user
    #[arg(long, env = "MARGE_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// File containing the API token
    #[arg(long)]
    pub auth_token_file: Option<PathBuf>,

    /// SSH key used to fetch and push
    #[arg(long)]
    pub ssh_key_file: Option<PathBuf>,

    /// Project to watch (`group/name`); repeatable
    #[arg(long = "project", value_name = "PATH")]
    pub projects: Vec<String>,

    /// Config file [default: <config dir>/marge/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the project clones
    #[arg(long)]
    pub repo_dir: Option<PathBuf>,

    /// Merge the target branch into the source instead of rebasing
    #[arg(long)]
    pub use_merge_strategy: bool,

    /// Add `Tested-by` trailers
    #[arg(long)]
    pub add_tested: bool,

    /// Add `Part-of` trailers linking to the merge request
    #[arg(long)]
    pub add_part_of: bool,

    /// Add `Reviewed-by` trailers for every approver
    #[arg(long)]
    pub add_reviewers: bool,

    /// Restore approvals reset by our push (needs admin rights)
    #[arg(long)]
    pub impersonate_approvers: bool,

    /// How long to wait for approvals to reset after a push, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub approval_reset_timeout: Option<Duration>,

    /// How long to wait for CI, e.g. "15min"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ci_timeout: Option<Duration>,

    /// Do not merge during these windows, e.g. "Fri 1pm - Mon 7am"
    #[arg(long)]
    pub embargo: Option<String>,

    /// Only count pipelines with a job whose name matches this
    #[arg(long)]
    pub job_regexp: Option<String>,

    /// Trigger a pipeline when there is none for the rewritten commit
    #[arg(long)]
    pub create_pipeline: bool,

    /// Branch of the target project used to run CI for forks
    #[arg(long)]
    pub temp_branch: Option<String>,

    /// Only merge into target branches matching this
    #[arg(long)]
    pub branch_regexp: Option<String>,

    /// Only merge source branches matching this
    #[arg(long)]
    pub source_branch_regexp: Option<String>,

    /// Fuse/push/accept rounds when the target branch keeps moving
    #[arg(long)]
    pub max_fusion_attempts: Option<u32>,

    /// Do not ask GitLab to remove the source branch after merging
    #[arg(long)]
    pub keep_source_branch: bool,

    /// Process every project once and exit
    #[arg(long)]
    pub cli: bool,

    /// Debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Everything the bot needs to run, after merging flags and config file
pub struct Settings {
    /// Base URL of the GitLab instance
    pub gitlab_url: String,
    /// Token given directly
    pub auth_token: Option<String>,
    /// Token file
    pub auth_token_file: Option<PathBuf>,
    /// SSH key for git
    pub ssh_key_file: Option<PathBuf>,
    /// Projects to watch
    pub projects: Vec<String>,
    /// Where clones live
    pub repo_dir: PathBuf,
    /// Target branch filter
    pub branch_regexp: Regex,
    /// Source branch filter
    pub source_branch_regexp: Regex,
    /// Exit after one pass
    pub run_once: bool,
    /// Options shared by all jobs
    pub options: JobOptions,
}

impl Cli {
    /// Overlay command line values onto `config`
    pub fn merge_into(self, mut config: Config) -> Config {
        fn pick<T>(flag: Option<T>, file: &mut Option<T>) {
            if flag.is_some() {
                *file = flag;
            }
        }

        pick(self.gitlab_url, &mut config.gitlab_url);
        pick(self.auth_token_file, &mut config.auth_token_file);
        pick(self.ssh_key_file, &mut config.ssh_key_file);
        pick(self.repo_dir, &mut config.repo_dir);
        pick(self.approval_reset_timeout, &mut config.approval_reset_timeout);
        pick(self.ci_timeout, &mut config.ci_timeout);
        pick(self.embargo, &mut config.embargo);
        pick(self.job_regexp, &mut config.job_regexp);
        pick(self.temp_branch, &mut config.temp_branch);
        pick(self.branch_regexp, &mut config.branch_regexp);
        pick(self.source_branch_regexp, &mut config.source_branch_regexp);
        pick(self.max_fusion_attempts, &mut config.max_fusion_attempts);
        if !self.projects.is_empty() {
            config.projects = self.projects;
        }
        config.use_merge_strategy |= self.use_merge_strategy;
        config.add_tested |= self.add_tested;
        config.add_part_of |= self.add_part_of;
        config.add_reviewers |= self.add_reviewers;
        config.impersonate_approvers |= self.impersonate_approvers;
        config.create_pipeline |= self.create_pipeline;
        config.keep_source_branch |= self.keep_source_branch;
        config
    }

    /// Load the config file, apply the flags and validate the result
    pub fn into_settings(self) -> Result<Settings> {
        let config = Config::load_or_default(self.config.as_deref())?;
        let auth_token = self.auth_token.clone();
        let run_once = self.cli;
        let mut config = self.merge_into(config);

        let gitlab_url = config
            .gitlab_url
            .take()
            .ok_or_else(|| Error::Config("no GitLab URL: pass --gitlab-url".to_string()))?;
        url::Url::parse(&gitlab_url)
            .map_err(|e| Error::Config(format!("invalid GitLab URL `{gitlab_url}`: {e}")))?;
        if config.projects.is_empty() {
            return Err(Error::Config("no projects: pass --project".to_string()));
        }
        let repo_dir = match config.repo_dir.take() {
            Some(dir) => dir,
            None => dirs::cache_dir()
                .map(|dir| dir.join("marge").join("repos"))
                .ok_or_else(|| Error::Config("no cache dir: pass --repo-dir".to_string()))?,
        };
        let branch_regexp =
            compile_regex("branch_regexp", config.branch_regexp.as_deref().unwrap_or(".*"))?;
        let source_branch_regexp = compile_regex(
            "source_branch_regexp",
            config.source_branch_regexp.as_deref().unwrap_or(".*"),
        )?;

        Ok(Settings {
            gitlab_url,
            auth_token,
            auth_token_file: config.auth_token_file.take(),
            ssh_key_file: config.ssh_key_file.take(),
            projects: std::mem::take(&mut config.projects),
            repo_dir,
            branch_regexp,
            source_branch_regexp,
            run_once,
            options: config.into_job_options()?,
        })
    }
}
