//! Entry point for one `UpdateManifests` bidirectional stream, built on a
//! `tokio::spawn` task paired with a channel-backed response stream.

use std::sync::Arc;

use futures::StreamExt;
use manifest_promotion_proto as proto;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

use crate::file_receiver::FileReceiver;
use crate::model::{
    attribute_map_from_proto, FileChunk, Repository, Request as PipelineRequest, RequestPaths,
    RequestSource, RequestSourceMetadata,
};
use crate::reporter::{self, Reporter};
use crate::scratch::ScratchFs;
use crate::strategies::Strategies;

/// Response channel capacity: one slot for the terminal frame beyond
/// whatever the reporter drain is mid-send on. Generous enough that the
/// drain and the terminal-frame send never deadlock against each other.
const OUT_CHANNEL_CAPACITY: usize = 4;

pub struct GitOpsService {
    strategies: Arc<Strategies>,
}

impl GitOpsService {
    pub fn new(strategies: Strategies) -> Self {
        Self {
            strategies: Arc::new(strategies),
        }
    }
}

#[tonic::async_trait]
impl proto::git_ops_server::GitOps for GitOpsService {
    type UpdateManifestsStream = ReceiverStream<Result<proto::ManifestResponse, Status>>;

    #[tracing::instrument(skip_all)]
    async fn update_manifests(
        &self,
        request: Request<Streaming<proto::ManifestRequest>>,
    ) -> Result<Response<Self::UpdateManifestsStream>, Status> {
        let incoming = request.into_inner();
        let (out_tx, out_rx) = mpsc::channel(OUT_CHANNEL_CAPACITY);
        let strategies = self.strategies.clone();

        tokio::spawn(async move {
            run_request(strategies, incoming, out_tx).await;
        });

        Ok(Response::new(ReceiverStream::new(out_rx)))
    }
}

async fn run_request(
    strategies: Arc<Strategies>,
    mut incoming: Streaming<proto::ManifestRequest>,
    out_tx: mpsc::Sender<Result<proto::ManifestResponse, Status>>,
) {
    let mut scratch = match ScratchFs::new() {
        Ok(scratch) => scratch,
        Err(err) => {
            let _ = out_tx.send(Err(Status::internal(format!("{err:#}")))).await;
            return;
        }
    };

    let repository_dir = scratch.mkdir("repository");
    let upload_dir = scratch.mkdir("upload");
    let (repository_dir, upload_dir) = match (repository_dir, upload_dir) {
        (Ok(r), Ok(u)) => (r, u),
        (Err(err), _) | (_, Err(err)) => {
            let _ = out_tx.send(Err(Status::internal(format!("{err:#}")))).await;
            scratch.clear();
            return;
        }
    };

    // The response channel only ever closes when the client has gone away
    // (disconnect, RPC cancel): watching it lets us observe that even after
    // the ingest loop has finished polling the inbound stream, mirroring the
    // original's context cancellation.
    let cancellation = CancellationToken::new();
    let watcher = {
        let cancellation = cancellation.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            out_tx.closed().await;
            cancellation.cancel();
        })
    };

    let (reporter, reporter_rx) = Reporter::channel();
    let drain = tokio::spawn(reporter::drain(reporter_rx, out_tx.clone()));

    let ingested = ingest(
        &mut incoming,
        &reporter,
        scratch.root().to_path_buf(),
        repository_dir,
        upload_dir,
        &cancellation,
    )
    .await;

    // Protocol errors (malformed frames, duplicate metadata, a file count
    // that never reconciles) abort the RPC itself; everything the pipeline
    // orchestrator can fail on instead becomes the terminal `Summary`/`Error`
    // frame on an otherwise healthy stream.
    let terminal = match ingested {
        Ok(request) => {
            let (response, result) =
                crate::pipeline::run(&strategies, &reporter, &request, &cancellation).await;
            if let Err(err) = &result {
                tracing::warn!(error = %err, "pipeline failed");
            }
            drop(reporter);
            let _ = drain.await;
            watcher.abort();

            let frame = match result {
                Ok(()) => {
                    proto::manifest_response::Response::Summary(to_summary(response))
                }
                Err(_) => proto::manifest_response::Response::Error(proto::Error {
                    message: response.error,
                }),
            };
            let _ = out_tx
                .send(Ok(proto::ManifestResponse {
                    response: Some(frame),
                }))
                .await;
            scratch.clear();
            return;
        }
        Err(status) => status,
    };

    drop(reporter);
    let _ = drain.await;
    watcher.abort();
    let _ = out_tx.send(Err(terminal)).await;
    scratch.clear();
}

/// Runs the ingest loop: frames a [`PipelineRequest`] out
/// of the metadata/file stream. Failures here are protocol errors and
/// abort the RPC rather than producing an `Error` frame.
async fn ingest(
    incoming: &mut Streaming<proto::ManifestRequest>,
    reporter: &Reporter,
    temp_root: std::path::PathBuf,
    repository_dir: std::path::PathBuf,
    upload_dir: std::path::PathBuf,
    cancellation: &CancellationToken,
) -> Result<PipelineRequest, Status> {
    let mut request: Option<PipelineRequest> = None;
    let mut file_receiver: Option<FileReceiver> = None;

    loop {
        let frame = tokio::select! {
            frame = incoming.next() => match frame {
                Some(frame) => frame?,
                None => break,
            },
            _ = cancellation.cancelled() => {
                return Err(Status::cancelled("client disconnected"));
            }
        };

        match frame.content {
            Some(proto::manifest_request::Content::Metadata(metadata)) => {
                if request.is_some() {
                    return Err(Status::invalid_argument(
                        crate::error::IngestError::DuplicateMetadata.to_string(),
                    ));
                }

                let paths = RequestPaths {
                    temp_root: temp_root.clone(),
                    repository_dir: repository_dir.clone(),
                    updated_manifests_dir: upload_dir.clone(),
                };
                let built = request_from_metadata(metadata, paths);
                built.validate().map_err(|err| Status::invalid_argument(err.to_string()))?;

                file_receiver = Some(FileReceiver::new(
                    upload_dir.clone(),
                    built.total_files,
                    reporter.clone(),
                ));
                request = Some(built);
            }
            Some(proto::manifest_request::Content::File(chunk)) => {
                let receiver = file_receiver.as_mut().ok_or_else(|| {
                    Status::invalid_argument("the first frame on the stream must be metadata")
                })?;
                receiver
                    .receive_chunk(FileChunk {
                        filename: chunk.filename,
                        content: chunk.content,
                        is_last_chunk: chunk.is_last_chunk,
                    })
                    .await
                    .map_err(|err| Status::internal(format!("{err:#}")))?;
            }
            None => {}
        }
    }

    let request = request.ok_or_else(|| Status::invalid_argument("no metadata frame received"))?;
    let file_receiver = file_receiver.ok_or_else(|| Status::invalid_argument("no files received"))?;
    file_receiver
        .done()
        .await
        .map_err(|err| Status::invalid_argument(err.to_string()))?;

    Ok(request)
}

fn request_from_metadata(
    metadata: proto::UpdateManifestMetadata,
    paths: RequestPaths,
) -> PipelineRequest {
    let source = metadata.source.map(|source| RequestSource {
        repository: source
            .repository
            .map(|r| Repository::new(r.url))
            .unwrap_or_default(),
        metadata: source
            .metadata
            .map(|m| RequestSourceMetadata {
                commit_sha: m.commit_sha,
                actor: m.actor,
                attributes: attribute_map_from_proto(m.attributes),
            })
            .unwrap_or_default(),
    });

    PipelineRequest {
        target_repository: metadata
            .config_repository
            .map(|r| Repository::new(r.url))
            .unwrap_or_default(),
        environment: metadata.environment,
        update_identifier: metadata.update_identifier,
        app_name: metadata.app_name,
        dry_run: metadata.dry_run,
        auto_review: metadata.auto_review,
        source,
        paths,
        total_files: u32::try_from(metadata.total_files).unwrap_or_default(),
        metadata: attribute_map_from_proto(metadata.metadata),
    }
}

fn to_summary(response: crate::model::Response) -> proto::Summary {
    proto::Summary {
        message: response.msg,
        review: response.review_result.map(|r| proto::ReviewSummary {
            created: r.created,
            url: r.url,
            completed: r.completed,
        }),
        environment: response.environment.map(|e| proto::EnvironmentSummary {
            repository: Some(proto::Repository { url: e.repository.url }),
            name: e.name,
            ref_name: e.ref_name,
        }),
        updated_files_count: response.updated_files_count as i32,
        dry_run: response.dry_run,
    }
}
