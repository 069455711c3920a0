//! The pluggable strategy surface: small, swappable behaviour contracts
//! resolved at server construction rather than a class hierarchy.

pub mod authenticator;
pub mod authoriser;
pub mod committer;
pub mod copier;
pub mod reviewer;
pub mod targeter;

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::error::{GitServiceError, PipelineError, ReviewError};
use crate::git_service::GitService;
use crate::model::{CreateReviewResult, Request, Target};
use crate::reporter::Reporter;

/// Decides whether a request is allowed to proceed.
#[async_trait]
pub trait Authoriser: Send + Sync {
    async fn authorise(&self, request: &Request, reporter: &Reporter) -> anyhow::Result<bool>;
}

/// Attaches credentials to a remote URL before it's used for clone/fetch/push.
/// Typical implementations inject `user:password` into the URL userinfo.
#[async_trait]
pub trait UrlAuthenticator: Send + Sync {
    async fn authenticated_url(&self, url: Url, reporter: &Reporter) -> anyhow::Result<Url>;
}

/// Resolves the branch/directory triple a request should land on. Pure
/// computation — configuration errors (e.g. `upstream=""` when
/// `orphan=false`) surface synchronously.
pub trait Targeter: Send + Sync {
    fn create_target(&self, request: &Request) -> Result<Target, PipelineError>;
}

/// Copies the rendered manifests into the target worktree.
#[async_trait]
pub trait FileCopier: Send + Sync {
    async fn copy_files(&self, src: &Path, dst: &Path, reporter: &Reporter) -> anyhow::Result<()>;
}

pub struct CommitOutcome {
    pub object_count: usize,
}

/// Commits whatever the file copier staged. The committer is handed the
/// already-prepared [`GitService`] rather than raw `git2` handles so it can
/// stay agnostic of clone/branch bookkeeping.
#[async_trait]
pub trait Committer: Send + Sync {
    async fn commit(
        &self,
        git: &mut GitService,
        request: &Request,
        target: &Target,
        reporter: &Reporter,
    ) -> Result<CommitOutcome, GitServiceError>;
}

/// Opens a code review for the pushed branch, and optionally completes it.
/// Implementations must be idempotent on create: look up an open review
/// matching `(base=target.branch.target, head=target.branch.source)` and
/// return it with `completed` reflecting its merge state, otherwise create
/// anew.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn create_review(
        &self,
        request: &Request,
        target: &Target,
        reporter: &Reporter,
    ) -> Result<CreateReviewResult, ReviewError>;

    async fn complete_review(
        &self,
        request: &Request,
        prior: &CreateReviewResult,
        reporter: &Reporter,
    ) -> Result<bool, ReviewError>;
}

/// The full set of strategies a server is constructed with. Bundles the
/// per-file processor chains alongside the single-instance strategies.
pub struct Strategies {
    pub authoriser: Box<dyn Authoriser>,
    pub url_authenticator: Box<dyn UrlAuthenticator>,
    pub targeter: Box<dyn Targeter>,
    pub file_copier: Box<dyn FileCopier>,
    pub committer: Box<dyn Committer>,
    pub reviewer: Box<dyn Reviewer>,
    pub mutators: Vec<Box<dyn crate::processors::Mutator>>,
    pub validators: Vec<Box<dyn crate::processors::Validator>>,
    pub git_author: crate::git_service::Author,
    pub clone_depth: i32,
}
