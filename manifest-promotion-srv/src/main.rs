//! Manifest promotion server entry point: wires the default strategies
//! together and runs the gRPC service alongside a health endpoint.

use std::net::SocketAddr;

use anyhow::Context;
use manifest_promotion::git_service::Author;
use manifest_promotion::processors::mutators::{MustacheMutator, NewlineEofMutator};
use manifest_promotion::processors::validators::EmptyFileValidator;
use manifest_promotion::strategies::authenticator::{NoneAuthenticator, UserPasswordAuthenticator};
use manifest_promotion::strategies::authoriser::StaticAuthoriser;
use manifest_promotion::strategies::committer::StandardCommitter;
use manifest_promotion::strategies::copier::SubpathCopier;
use manifest_promotion::strategies::reviewer::DummyReviewer;
use manifest_promotion::strategies::targeter::BranchTargeter;
use manifest_promotion::strategies::Strategies;
use manifest_promotion::{GitOpsService, ServerConfig};
use manifest_promotion_proto::git_ops_server::GitOpsServer;
use tonic::transport::Server;

/// `GITEA_USER`/`GITEA_ACCESS_TOKEN`, after the env vars
/// credentials the default authenticator uses.
/// Either unset falls back to [`NoneAuthenticator`].
fn default_authenticator() -> Box<dyn manifest_promotion::strategies::UrlAuthenticator> {
    let username = std::env::var("GITEA_USER").ok();
    let password = std::env::var("GITEA_ACCESS_TOKEN").ok();
    match (username, password) {
        (Some(username), Some(password)) => {
            Box::new(UserPasswordAuthenticator::new(username, password))
        }
        _ => Box::new(NoneAuthenticator),
    }
}

fn default_strategies(config: &ServerConfig) -> anyhow::Result<Strategies> {
    let targeter = BranchTargeter::orphan(config.branch_prefix.clone(), "manifests");

    Ok(Strategies {
        authoriser: Box::new(StaticAuthoriser::allow_all()),
        url_authenticator: default_authenticator(),
        targeter: Box::new(targeter),
        file_copier: Box::new(SubpathCopier),
        committer: Box::new(StandardCommitter::new("Update rendered manifests")),
        reviewer: Box::new(DummyReviewer::new("https://example.com/review/1", true)),
        mutators: vec![
            Box::new(NewlineEofMutator),
            Box::new(MustacheMutator),
        ],
        validators: vec![Box::new(EmptyFileValidator)],
        git_author: Author::new("gitops-manager", "gitops-manager@example.com"),
        clone_depth: config.clone_depth,
    })
}

async fn serve_health(addr: SocketAddr) {
    let router = axum::Router::new().route("/health", axum::routing::get(|| async { "ok" }));
    if let Err(err) = axum::Server::bind(&addr).serve(router.into_make_service()).await {
        tracing::error!(error = %err, "health server failed");
    }
}

/// Registers a Ctrl-C handler and returns a future that resolves once it
/// fires, so in-flight `UpdateManifests` streams get to finish before the
/// listener closes.
fn termination_signal() -> anyhow::Result<impl std::future::Future<Output = ()>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    ctrlc::set_handler(move || {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(async {
        let _ = rx.await;
        tracing::info!("shutdown signal received");
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load().context("loading server configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(log_level = %config.log_level, "logger initialised");

    let strategies = default_strategies(&config)?;
    let service = GitOpsService::new(strategies);

    tokio::spawn(serve_health(config.health_addr()));

    let listen_addr = config.listen_addr();
    tracing::info!(port = config.port, "gRPC server listening");

    Server::builder()
        .add_service(GitOpsServer::new(service))
        .serve_with_shutdown(listen_addr, termination_signal()?)
        .await
        .context("gRPC server failed")?;

    Ok(())
}
