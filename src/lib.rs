//! marge - merges GitLab merge requests once they are approved and green
//!
//! The [`merge::MergeJob`] takes one merge request assigned to the bot,
//! rebases (or merges) it onto its target, optionally stamps trailers into
//! the commits, waits for CI and asks GitLab to merge. GitLab and git are
//! reached only through the traits in [`platform`] and [`git`].

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod git;
pub mod interval;
pub mod merge;
pub mod options;
pub mod platform;
pub mod types;

pub use error::{Error, Result};
