//! Error types for marge
//!
//! `Error` is the tooling failure category: transport faults, unexpected API
//! responses, git subprocess failures and bad configuration. Business-rule
//! failures of a merge job live in [`crate::merge::JobError`].

use crate::git::GitError;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// GitLab answered with a non-success HTTP status
    #[error("GitLab API error (HTTP {status}): {message}")]
    GitLabApi {
        /// HTTP status code
        status: u16,
        /// Response body or a description of the failed call
        message: String,
    },

    /// Transport-level HTTP failure (connect, timeout, decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local git failure
    #[error(transparent)]
    Git(#[from] GitError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Missing or unusable credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// Platform-level failure not tied to an HTTP status
    #[error("platform error: {0}")]
    Platform(String),
}

impl Error {
    /// Build a `GitLabApi` error
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::GitLabApi {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::GitLabApi { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 401
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// 403
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    /// 404
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 405, e.g. merging a merge request that is not in a mergeable state
    pub fn is_method_not_allowed(&self) -> bool {
        self.status() == Some(405)
    }

    /// 406, GitLab's answer when the branch cannot be merged right now
    pub fn is_not_acceptable(&self) -> bool {
        self.status() == Some(406)
    }

    /// 409, e.g. the `sha` passed to merge does not match the head
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Server-side hiccups worth waiting out: 5xx, 429 and timeouts
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) if e.is_timeout() || e.is_connect() => true,
            _ => self
                .status()
                .is_some_and(|s| s == 429 || (500..=599).contains(&s)),
        }
    }
}
