//! Authentication for GitLab
//!
//! The token comes from `--auth-token` / `MARGE_AUTH_TOKEN` or from a file.

use crate::error::{Error, Result};
use crate::platform::ProjectService;
use crate::types::User;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Source of authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// Token passed on the command line or in the environment
    Argument,
    /// Token read from a file
    File,
}

/// GitLab authentication configuration
#[derive(Debug, Clone)]
pub struct GitLabAuthConfig {
    /// Personal or bot access token
    pub token: String,
    /// Where the token came from
    pub source: AuthSource,
}

/// Resolve the GitLab token
///
/// A token given directly takes precedence over `token_file`.
pub fn get_gitlab_auth(token: Option<&str>, token_file: Option<&Path>) -> Result<GitLabAuthConfig> {
    if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
        debug!("using GitLab token from arguments");
        return Ok(GitLabAuthConfig {
            token: token.to_string(),
            source: AuthSource::Argument,
        });
    }

    if let Some(path) = token_file {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Auth(format!("failed to read {}: {e}", path.display())))?;
        let token = content.trim();
        if token.is_empty() {
            return Err(Error::Auth(format!("{} is empty", path.display())));
        }
        debug!(path = %path.display(), "using GitLab token from file");
        return Ok(GitLabAuthConfig {
            token: token.to_string(),
            source: AuthSource::File,
        });
    }

    Err(Error::Auth(
        "no GitLab token: pass --auth-token, set MARGE_AUTH_TOKEN or use --auth-token-file"
            .to_string(),
    ))
}

/// Check the token by asking who it belongs to
pub async fn test_gitlab_auth(platform: &dyn ProjectService) -> Result<User> {
    match platform.current_user().await {
        Ok(user) => {
            debug!(username = %user.username, "authenticated");
            Ok(user)
        }
        Err(err) if err.is_unauthorized() => {
            Err(Error::Auth("GitLab rejected the token".to_string()))
        }
        Err(err) => Err(err),
    }
}
