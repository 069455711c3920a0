//! Typed error boundaries for the pipeline stages.
//!
//! Internal helpers return `anyhow::Result` and propagate with `?`; these
//! enums exist at the points a caller needs to match on failure kind, e.g.
//! the stream handler deciding between a protocol-level RPC error and a
//! pipeline `Error` frame.

use thiserror::Error;

/// Errors raised while ingesting a request from the stream, before the
/// pipeline runs.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request metadata already received")]
    DuplicateMetadata,

    #[error("no files received")]
    NoFilesReceived,

    #[error("partially received {0} files")]
    PartiallyReceivedFiles(usize),

    #[error("received {received}/{total} files")]
    FileCountMismatch { received: u32, total: u32 },

    #[error("target_repository is required")]
    MissingTargetRepository,

    #[error("environment is required")]
    MissingEnvironment,

    #[error("app_name is required")]
    MissingAppName,

    #[error("update_identifier is required")]
    MissingUpdateIdentifier,
}

/// Errors raised by the [`crate::git_service::GitService`].
#[derive(Debug, Error)]
pub enum GitServiceError {
    #[error("failed to clone repository: {0}")]
    Clone(#[source] git2::Error),

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("failed to fetch origin: {0}")]
    Fetch(#[source] git2::Error),

    #[error("failed to push {refname}: {source}")]
    Push {
        refname: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to checkout {refname}: {source}")]
    Checkout {
        refname: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to commit: {0}")]
    Commit(#[source] git2::Error),

    #[error("git error: {0}")]
    Other(#[from] git2::Error),
}

/// Errors raised by a [`crate::strategies::reviewer::Reviewer`].
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("failed to create review: {0}")]
    CreateFailed(String),

    #[error("review creation returned unexpected status {0}")]
    UnexpectedCreateStatus(u16),

    #[error("failed to complete review: {0}")]
    CompleteFailed(String),

    #[error("review completion returned unexpected status {0}")]
    UnexpectedCompleteStatus(u16),
}

/// The taxonomy of terminal pipeline-stage failures. Any variant here
/// becomes the `Error` frame's message on the stream.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request denied")]
    NotAuthorised,

    #[error("authorisation failed: {0}")]
    AuthorisationFailed(String),

    #[error("targeter misconfigured: {0}")]
    TargetConfiguration(String),

    #[error("repository error: {0}")]
    Repository(#[from] GitServiceError),

    #[error("{0} failed to mutate {1}: {2}")]
    Mutation(String, String, String),

    #[error("invalid manifests: {0}")]
    Validation(String),

    #[error("failed to copy files: {0}")]
    Copy(String),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error("review was not merged")]
    ReviewNotMerged,

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}
