//! Streaming client for the manifest promotion service: uploads a rendered
//! manifests directory over one `UpdateManifests` call and relays the
//! server's progress/summary frames to the terminal.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use manifest_promotion_proto as proto;
use manifest_promotion_proto::git_ops_client::GitOpsClient;
use proto::manifest_request::Content;
use proto::manifest_response::Response;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Parser, Debug)]
#[clap(name = "manifest-promotion-cli")]
#[clap(about = "Uploads rendered manifests to a manifest promotion server", version, author)]
struct Cli {
    /// Directory containing the rendered manifests to upload.
    manifests_dir: PathBuf,

    /// Manifest promotion server host, e.g. `localhost:50051`.
    server_host: String,

    #[clap(long = "target-repository", default_value = "")]
    target_repository: String,

    #[clap(long = "env", default_value = "")]
    environment: String,

    #[clap(long = "app", default_value = "")]
    app_name: String,

    #[clap(long = "update-id", default_value = "")]
    update_identifier: String,

    #[clap(long = "dry-run", parse(try_from_str), default_value = "true")]
    dry_run: bool,

    #[clap(long = "auto-review", parse(try_from_str), default_value = "false")]
    auto_review: bool,

    #[clap(long = "source-repository", default_value = "")]
    source_repository: String,

    #[clap(long = "commit-sha", default_value = "")]
    commit_sha: String,

    #[clap(long = "actor", default_value = "")]
    actor: String,

    /// JSON object string, e.g. `{"pull_request":123}`.
    #[clap(long = "source-attributes", default_value = "")]
    source_attributes: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let metadata = build_metadata(&cli)?;
    pretty_print_request(&metadata);

    let manifests_dir = cli
        .manifests_dir
        .canonicalize()
        .with_context(|| format!("reading manifests directory {:?}", cli.manifests_dir))?;
    let total_files = count_files(&manifests_dir)?;

    let secure = env_bool("GITOPS_SECURE", false)?;
    let mut client = connect(&cli.server_host, secure).await?;

    let (tx, rx) = mpsc::channel(8);
    tx.send(proto::ManifestRequest {
        content: Some(Content::Metadata(proto::UpdateManifestMetadata {
            total_files: i32::try_from(total_files).unwrap_or(i32::MAX),
            ..metadata
        })),
    })
    .await
    .context("sending request metadata")?;

    let outgoing = ReceiverStream::new(rx);
    let request = tonic::Request::new(outgoing);
    let mut inbound = client.update_manifests(request).await?.into_inner();

    let upload_task = tokio::spawn(upload_directory(tx, manifests_dir));

    let mut had_error = false;
    let mut summary: Option<proto::Summary> = None;

    while let Some(message) = inbound.message().await? {
        match message.response {
            Some(Response::Progress(progress)) => {
                if progress.kind == proto::ProgressKind::Failure as i32 {
                    had_error = true;
                }
                print_progress(&progress);
            }
            Some(Response::Error(error)) => {
                had_error = true;
                eprintln!("\x1b[31m[ERROR] {}\x1b[0m", error.message);
            }
            Some(Response::Summary(s)) => summary = Some(s),
            None => {}
        }
    }

    upload_task
        .await
        .context("upload task panicked")?
        .context("uploading manifests")?;

    if let Some(summary) = summary {
        print_summary(&summary);
    }

    if had_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn connect(server_host: &str, secure: bool) -> Result<GitOpsClient<Channel>> {
    let scheme = if secure { "https" } else { "http" };
    let uri = format!("{scheme}://{server_host}");
    let mut endpoint = Endpoint::from_shared(uri)?.timeout(REQUEST_TIMEOUT);
    if secure {
        endpoint = endpoint.tls_config(ClientTlsConfig::new())?;
    }
    let channel = endpoint.connect().await.context("connecting to server")?;
    Ok(GitOpsClient::new(channel))
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(value) if value.is_empty() => Ok(default),
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid boolean value for {key}: {value}")),
        Err(_) => Ok(default),
    }
}

fn build_metadata(cli: &Cli) -> Result<proto::UpdateManifestMetadata> {
    let source_attributes = parse_attributes(&cli.source_attributes)?;

    Ok(proto::UpdateManifestMetadata {
        config_repository: Some(proto::Repository {
            url: cli.target_repository.clone(),
        }),
        environment: cli.environment.clone(),
        app_name: cli.app_name.clone(),
        update_identifier: cli.update_identifier.clone(),
        dry_run: cli.dry_run,
        auto_review: cli.auto_review,
        source: Some(proto::RequestSource {
            repository: Some(proto::Repository {
                url: cli.source_repository.clone(),
            }),
            metadata: Some(proto::RequestSourceMetadata {
                commit_sha: cli.commit_sha.clone(),
                actor: cli.actor.clone(),
                attributes: Some(source_attributes),
            }),
        }),
        metadata: Some(proto::AttributeMap::default()),
        total_files: 0,
    })
}

fn parse_attributes(raw: &str) -> Result<proto::AttributeMap> {
    if raw.trim().is_empty() {
        return Ok(proto::AttributeMap::default());
    }
    let value: serde_json::Value =
        serde_json::from_str(raw).context("parsing --source-attributes as JSON")?;
    let serde_json::Value::Object(fields) = value else {
        bail!("--source-attributes must be a JSON object");
    };
    Ok(proto::AttributeMap {
        fields: fields
            .into_iter()
            .map(|(k, v)| (k, json_to_attribute_value(v)))
            .collect(),
    })
}

fn json_to_attribute_value(value: serde_json::Value) -> proto::AttributeValue {
    use proto::attribute_value::Kind;

    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(proto::NullValue::NullValue as i32),
        serde_json::Value::Bool(b) => Kind::BoolValue(b),
        serde_json::Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Kind::StringValue(s),
        serde_json::Value::Array(items) => Kind::ListValue(proto::AttributeList {
            values: items.into_iter().map(json_to_attribute_value).collect(),
        }),
        serde_json::Value::Object(fields) => Kind::ObjectValue(proto::AttributeMap {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k, json_to_attribute_value(v)))
                .collect::<BTreeMap<_, _>>()
                .into_iter()
                .collect(),
        }),
    };
    proto::AttributeValue { kind: Some(kind) }
}

fn count_files(directory: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in walkdir::WalkDir::new(directory) {
        let entry = entry.context("walking manifests directory")?;
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

async fn upload_directory(
    tx: mpsc::Sender<proto::ManifestRequest>,
    directory: PathBuf,
) -> Result<()> {
    for entry in walkdir::WalkDir::new(&directory) {
        let entry = entry.context("walking manifests directory")?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(&directory)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        let content = tokio::fs::read(entry.path())
            .await
            .with_context(|| format!("reading {:?}", entry.path()))?;

        tx.send(proto::ManifestRequest {
            content: Some(Content::File(proto::FileChunk {
                filename: relative,
                content,
                is_last_chunk: true,
            })),
        })
        .await
        .context("sending file chunk")?;
    }
    Ok(())
}

fn print_progress(progress: &proto::Progress) {
    if progress.kind == proto::ProgressKind::Heading as i32 {
        println!("\x1b[1m* {}\x1b[0m", progress.status.to_uppercase());
    } else if progress.kind == proto::ProgressKind::Success as i32 {
        println!("\x1b[32m\u{2714} {}\x1b[0m", progress.status);
    } else if progress.kind == proto::ProgressKind::Failure as i32 {
        println!("\x1b[31m\u{2716} {}\x1b[0m", progress.status);
    } else {
        println!("\u{2192} {}", progress.status);
    }
}

fn pretty_print_request(metadata: &proto::UpdateManifestMetadata) {
    println!("Manifest update request:");
    println!("  environment        : {}", metadata.environment);
    println!("  app                : {}", metadata.app_name);
    println!("  update identifier  : {}", metadata.update_identifier);
    println!("  dry run            : {}", metadata.dry_run);
    println!("  auto review        : {}", metadata.auto_review);
    if let Some(repo) = &metadata.config_repository {
        println!("  config repository  : {}", repo.url);
    }
    println!();
}

fn print_summary(summary: &proto::Summary) {
    println!();
    println!("Result:");
    println!("  message            : {}", summary.message);
    println!("  updated files      : {}", summary.updated_files_count);
    println!("  dry run            : {}", summary.dry_run);
    if let Some(review) = &summary.review {
        println!("  review created     : {}", review.created);
        println!("  review completed   : {}", review.completed);
        if !review.url.is_empty() {
            println!("  review url         : {}", review.url);
        }
    }
    if let Some(environment) = &summary.environment {
        println!("  environment name   : {}", environment.name);
        println!("  environment ref    : {}", environment.ref_name);
    }
}
