//! The default committer strategy.

use async_trait::async_trait;

use super::{CommitOutcome, Committer};
use crate::error::GitServiceError;
use crate::git_service::GitService;
use crate::model::{Request, Target};
use crate::reporter::Reporter;

/// Adds `<target.directory>/*`, and commits with a fixed subject plus a
/// body describing the request's source, if the worktree is dirty.
pub struct StandardCommitter {
    pub commit_subject: String,
}

impl StandardCommitter {
    pub fn new(commit_subject: impl Into<String>) -> Self {
        Self {
            commit_subject: commit_subject.into(),
        }
    }

    /// The commit body describing the request's source, distinct from
    /// the fixed subject line.
    pub fn commit_body(request: &Request) -> String {
        let mut body = format!(
            "App: {}\nUpdate: {}",
            request.app_name, request.update_identifier
        );
        if let Some(source) = &request.source {
            body.push_str(&format!(
                "\nSource repository: {}\nSource commit: {}\nActor: {}",
                source.repository.url, source.metadata.commit_sha, source.metadata.actor
            ));
        }
        body
    }
}

#[async_trait]
impl Committer for StandardCommitter {
    async fn commit(
        &self,
        git: &mut GitService,
        request: &Request,
        target: &Target,
        reporter: &Reporter,
    ) -> Result<CommitOutcome, GitServiceError> {
        reporter
            .basic_progress("adding updated manifests to the current git worktree")
            .await;

        let body = Self::commit_body(request);
        let object_count =
            git.commit_target_directory(&target.directory, &self.commit_subject, &body)?;

        reporter
            .basic_progress(format!("found {object_count} changed objects"))
            .await;

        if object_count > 0 {
            reporter
                .basic_progress(format!("committed {object_count} objects"))
                .await;
        } else {
            reporter.basic_progress("no changes to commit").await;
        }

        Ok(CommitOutcome { object_count })
    }
}
