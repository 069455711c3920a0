//! Core request pipeline for the manifest promotion service.
//!
//! This crate owns everything left of the strategy boundary: the data
//! model, the progress reporter, the scratch filesystem, the file
//! receiver, the Git service, the strategy/processor contracts and their
//! default implementations, the pipeline orchestrator, and the stream
//! handler that drives one `UpdateManifests` call. The binaries
//! (`manifest-promotion-srv`, `manifest-promotion-cli`) wire concrete
//! strategies together and own the server/CLI surface.

pub mod config;
pub mod error;
pub mod file_receiver;
pub mod git_service;
pub mod model;
pub mod pipeline;
pub mod processors;
pub mod reporter;
pub mod scratch;
pub mod strategies;
pub mod stream_handler;

pub use config::ServerConfig;
pub use error::{GitServiceError, IngestError, PipelineError, ReviewError};
pub use stream_handler::GitOpsService;
pub use strategies::Strategies;
