//! Forge-backed reviewers (Gitea, GitLab) are out-of-scope third-party
//! integrations; only the contract they must honour is specified here:
//!
//! - `create_review` must be idempotent: look up an open review matching
//!   `(base = target.branch.target, head = target.branch.source)` and
//!   return it with `completed` reflecting its merge state, rather than
//!   creating a duplicate.
//! - A non-`201` response to the create call is a [`ReviewError`].
//! - `complete_review`'s merge call retries once, after a one-second delay,
//!   on a `405 Method Not Allowed` response before surfacing as fatal — the
//!   forge briefly rejecting a merge right after approval is transient. A
//!   non-`200` response after the retry is a [`ReviewError`].

use async_trait::async_trait;

use super::Reviewer;
use crate::error::ReviewError;
use crate::model::{CreateReviewResult, Request, Target};
use crate::reporter::Reporter;

/// A reviewer that never talks to a forge: always reports the review as
/// created, and completes it according to a fixed flag. Used for
/// `dry_run` synthesis and local testing.
pub struct DummyReviewer {
    pub url: String,
    pub complete: bool,
}

impl DummyReviewer {
    pub fn new(url: impl Into<String>, complete: bool) -> Self {
        Self {
            url: url.into(),
            complete,
        }
    }
}

#[async_trait]
impl Reviewer for DummyReviewer {
    async fn create_review(
        &self,
        _request: &Request,
        _target: &Target,
        _reporter: &Reporter,
    ) -> Result<CreateReviewResult, ReviewError> {
        Ok(CreateReviewResult {
            created: true,
            completed: false,
            url: self.url.clone(),
        })
    }

    async fn complete_review(
        &self,
        _request: &Request,
        _prior: &CreateReviewResult,
        _reporter: &Reporter,
    ) -> Result<bool, ReviewError> {
        Ok(self.complete)
    }
}

/// A minimal, dependency-free stand-in for a forge's open-pull-request
/// listing, used by tests that exercise the idempotency contract without a
/// real Gitea/GitLab instance. Tracks reviews by `(base, head)` in memory.
#[derive(Default)]
pub struct InMemoryReviewer {
    reviews: std::sync::Mutex<Vec<CreateReviewResult>>,
    keys: std::sync::Mutex<Vec<(String, String)>>,
}

impl InMemoryReviewer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Reviewer for InMemoryReviewer {
    async fn create_review(
        &self,
        request: &Request,
        target: &Target,
        reporter: &Reporter,
    ) -> Result<CreateReviewResult, ReviewError> {
        let key = (target.branch.target.clone(), target.branch.source.clone());
        let mut keys = self.keys.lock().unwrap();
        let mut reviews = self.reviews.lock().unwrap();

        if let Some(index) = keys.iter().position(|k| k == &key) {
            reporter.basic_progress("pull Request already exists").await;
            return Ok(reviews[index].clone());
        }

        let url = format!(
            "https://example.invalid/{}/pulls/{}",
            request.app_name,
            keys.len() + 1
        );
        let result = CreateReviewResult {
            created: true,
            url,
            completed: false,
        };
        keys.push(key);
        reviews.push(result.clone());
        Ok(result)
    }

    async fn complete_review(
        &self,
        _request: &Request,
        prior: &CreateReviewResult,
        _reporter: &Reporter,
    ) -> Result<bool, ReviewError> {
        let mut reviews = self.reviews.lock().unwrap();
        if let Some(review) = reviews.iter_mut().find(|r| r.url == prior.url) {
            review.completed = true;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Repository, TargetBranch};

    fn request() -> Request {
        Request {
            target_repository: Repository::new("https://example.com/repo.git"),
            environment: "dev".into(),
            update_identifier: "feature-x".into(),
            app_name: "web".into(),
            dry_run: false,
            auto_review: false,
            source: None,
            paths: Default::default(),
            total_files: 0,
            metadata: Default::default(),
        }
    }

    fn target() -> Target {
        Target {
            repository: Repository::new("https://example.com/repo.git"),
            branch: TargetBranch {
                source: "environment/dev-next/web/feature-x".into(),
                target: "environment/dev".into(),
                upstream_source: "environment/dev".into(),
            },
            directory: "web".into(),
        }
    }

    #[tokio::test]
    async fn second_create_for_same_branches_does_not_duplicate() {
        let (reporter, mut rx) = Reporter::channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let reviewer = InMemoryReviewer::new();
        let first = reviewer
            .create_review(&request(), &target(), &reporter)
            .await
            .unwrap();
        let second = reviewer
            .create_review(&request(), &target(), &reporter)
            .await
            .unwrap();

        assert_eq!(first.url, second.url);
        assert!(!second.completed);
    }
}
