//! Provenance trailers written into the merged commits

use tracing::{debug, info};

use crate::git::ORIGIN;
use crate::merge::job::MergeJob;
use crate::merge::outcome::JobResult;
use crate::types::{MergeRequest, User};

/// `Tested-by` value: the bot, linking to where the testing happened
pub fn tested_by_value(bot: &User, mr: &MergeRequest) -> String {
    format!("{} <{}>", bot.name, mr.web_url)
}

/// `Part-of` value: the merge request URL
pub fn part_of_value(mr: &MergeRequest) -> String {
    format!("<{}>", mr.web_url)
}

impl MergeJob<'_> {
    /// Apply the enabled trailers to the checked-out source branch
    ///
    /// Returns the new head, or `None` if no trailer was written.
    pub async fn add_trailers(&self, mr: &MergeRequest) -> JobResult<Option<String>> {
        let options = self.ctx.options;
        let repo = self.ctx.repo;
        let target_ref = format!("{ORIGIN}/{}", mr.target_branch);
        let mut sha = None;

        if !options.requests_commit_tagging() {
            return Ok(sha);
        }
        info!(mr_iid = mr.iid, "adding trailers");

        if options.add_reviewers {
            let reviewers = self.reviewer_identities(mr).await?;
            if reviewers.is_empty() {
                debug!(mr_iid = mr.iid, "no approvers to credit");
            } else {
                sha = Some(repo.tag_with_trailer(
                    "Reviewed-by",
                    &reviewers,
                    &mr.source_branch,
                    &target_ref,
                )?);
            }
        }

        let tested = options.add_tested
            && self.ctx.project.only_allow_merge_if_pipeline_succeeds
            && !options.use_merge_strategy();
        if tested {
            sha = Some(repo.tag_with_trailer(
                "Tested-by",
                &[tested_by_value(self.ctx.user, mr)],
                &mr.source_branch,
                &format!("{}^", mr.source_branch),
            )?);
        }

        if options.add_part_of {
            sha = Some(repo.tag_with_trailer(
                "Part-of",
                &[part_of_value(mr)],
                &mr.source_branch,
                &target_ref,
            )?);
        }

        Ok(sha)
    }

    /// `Name <email>` for every current approver
    async fn reviewer_identities(&self, mr: &MergeRequest) -> JobResult<Vec<String>> {
        let platform = self.ctx.platform;
        let approvals = platform.fetch_approvals(mr).await?;
        let mut reviewers = Vec::with_capacity(approvals.approver_ids.len());
        for id in &approvals.approver_ids {
            reviewers.push(platform.fetch_user(*id).await?.trailer_identity());
        }
        Ok(reviewers)
    }
}
