//! Configuration file loading
//!
//! The TOML file mirrors the command line flags. Values given on the command
//! line win; see `cli::Cli::merge_into`.

use crate::error::{Error, Result};
use crate::interval::IntervalUnion;
use crate::options::{Fusion, JobOptions};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the user config dir
const CONFIG_DIR: &str = "marge";

/// Filename of the default config
const CONFIG_FILE: &str = "config.toml";

/// Settings read from `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Base URL of the GitLab instance
    pub gitlab_url: Option<String>,
    /// File holding the API token
    pub auth_token_file: Option<PathBuf>,
    /// SSH key used for git operations
    pub ssh_key_file: Option<PathBuf>,
    /// Projects to watch (`group/name`)
    pub projects: Vec<String>,
    /// Where project clones live
    pub repo_dir: Option<PathBuf>,
    /// Merge the target into the source instead of rebasing
    pub use_merge_strategy: bool,
    /// Add `Tested-by` trailers
    pub add_tested: bool,
    /// Add `Part-of` trailers
    pub add_part_of: bool,
    /// Add `Reviewed-by` trailers
    pub add_reviewers: bool,
    /// Re-approve on behalf of the original approvers
    pub impersonate_approvers: bool,
    /// How long to wait for approvals to reset after a push
    #[serde(with = "humantime_serde")]
    pub approval_reset_timeout: Option<Duration>,
    /// How long to wait for CI
    #[serde(with = "humantime_serde")]
    pub ci_timeout: Option<Duration>,
    /// How long to wait for GitLab to finish a merge
    #[serde(with = "humantime_serde")]
    pub merge_timeout: Option<Duration>,
    /// Embargo windows, e.g. `"Fri 1pm - Mon 7am"`
    pub embargo: Option<String>,
    /// Pattern a pipeline job name must match
    pub job_regexp: Option<String>,
    /// Trigger pipelines when needed
    pub create_pipeline: bool,
    /// Temp branch for fork CI
    pub temp_branch: Option<String>,
    /// Only merge into target branches matching this
    pub branch_regexp: Option<String>,
    /// Only merge source branches matching this
    pub source_branch_regexp: Option<String>,
    /// Fuse/push/accept rounds per merge request
    pub max_fusion_attempts: Option<u32>,
    /// Do not ask GitLab to remove the source branch
    pub keep_source_branch: bool,
}

/// Default config location, e.g. `~/.config/marge/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

impl Config {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Parse config text
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Validate and convert into job options
    pub fn into_job_options(self) -> Result<JobOptions> {
        let embargo = match self.embargo.as_deref() {
            Some(text) => IntervalUnion::from_human(text)
                .map_err(|e| Error::Config(format!("invalid embargo `{text}`: {e}")))?,
            None => IntervalUnion::empty(),
        };

        let mut builder = JobOptions::builder()
            .add_tested(self.add_tested)
            .add_part_of(self.add_part_of)
            .add_reviewers(self.add_reviewers)
            .reapprove(self.impersonate_approvers)
            .embargo(embargo)
            .fusion(if self.use_merge_strategy {
                Fusion::Merge
            } else {
                Fusion::Rebase
            })
            .create_pipeline(self.create_pipeline)
            .temp_branch(self.temp_branch)
            .keep_source_branch(self.keep_source_branch);

        if let Some(pattern) = self.job_regexp.as_deref() {
            builder = builder.job_regexp(compile_regex("job_regexp", pattern)?);
        }
        if let Some(timeout) = self.approval_reset_timeout {
            builder = builder.approval_timeout(timeout);
        }
        if let Some(timeout) = self.ci_timeout {
            builder = builder.ci_timeout(timeout);
        }
        if let Some(timeout) = self.merge_timeout {
            builder = builder.merge_timeout(timeout);
        }
        if let Some(attempts) = self.max_fusion_attempts {
            builder = builder.max_fusion_attempts(attempts);
        }

        Ok(builder.build())
    }
}

/// Compile a user-supplied pattern, naming the setting on failure
pub fn compile_regex(setting: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("invalid {setting} `{pattern}`: {e}")))
}
