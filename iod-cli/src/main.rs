//! Binary entry point for the `jstorrentd` loopback I/O daemon.
//!
//! Wires the filesystem-backed reference implementations of `TokenStore`, `RootStore`, and
//! `UserInteraction` (see `jstorrentd::services::local_backends`) to `IoDaemonBuilder`,
//! installs tracing and a Prometheus metrics exporter, and serves the resulting router on a
//! loopback TCP listener. A real host embedding this daemon is expected to supply its own
//! collaborators instead, wiring `IoDaemonBuilder` the same way this binary does.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use eyre::Context as _;
use jstorrentd::IoDaemonBuilder;
use jstorrentd::config::IoDaemonConfig;
use jstorrentd::services::local_backends::{
    FsRootStore, FsTokenStore, LoggingUserInteraction, PairingApprovalPolicy,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

/// Configuration for the `jstorrentd` binary: the daemon core's config, flattened, plus the
/// handful of concerns that only the standalone binary (rather than a hosting application)
/// needs to know about.
#[derive(Parser, Debug)]
struct CliConfig {
    /// Directory the filesystem-backed reference `TokenStore`/`RootStore` persist their
    /// state under. Created on startup if it does not exist.
    #[clap(long, env = "JSTORRENTD_DATA_DIR", default_value = "./jstorrentd-data")]
    data_dir: PathBuf,

    /// Whether to auto-approve pairing requests instead of denying them. Intended for local
    /// development only — a production host supplies a real `UserInteraction` that shows an
    /// actual approval dialog.
    #[clap(long, env = "JSTORRENTD_AUTO_APPROVE_PAIRING")]
    auto_approve_pairing: bool,

    /// Loopback address the Prometheus metrics exporter listens on.
    #[clap(long, env = "JSTORRENTD_METRICS_ADDR", default_value = "127.0.0.1:9090")]
    metrics_addr: SocketAddr,

    #[clap(flatten)]
    daemon: IoDaemonConfig,
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("no other default crypto provider installed yet");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = CliConfig::parse();
    match run(config).await {
        Ok(()) => {
            tracing::info!("jstorrentd shut down cleanly");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run(config: CliConfig) -> eyre::Result<()> {
    tracing::info!(?config, "starting jstorrentd");

    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .context("failed to install prometheus metrics exporter")?;
    jstorrentd::metrics::describe_metrics();

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let token_store = Arc::new(
        FsTokenStore::new(&config.data_dir).context("opening pairing record")?,
    );
    let root_store = Arc::new(
        FsRootStore::new(&config.data_dir).context("opening root manifest")?,
    );
    let approval_policy = if config.auto_approve_pairing {
        PairingApprovalPolicy::AutoApprove
    } else {
        PairingApprovalPolicy::AlwaysDeny
    };
    let user_interaction = Arc::new(LoggingUserInteraction::new(approval_policy));

    let cancellation = CancellationToken::new();
    let shutdown_token = cancellation.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, shutting down");
        shutdown_token.cancel();
    });

    let listener = tokio::net::TcpListener::bind((config.daemon.bind_addr, config.daemon.port))
        .await
        .context("binding loopback listener")?;
    let bound_port = listener
        .local_addr()
        .context("reading bound local address")?
        .port();

    let router = IoDaemonBuilder::init(
        config.daemon,
        token_store,
        root_store,
        user_interaction,
        cancellation.clone(),
    )
    .with_bound_port(bound_port)
    .build();

    tracing::info!(port = bound_port, "jstorrentd listening");
    let serve_cancel = cancellation.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
        .await
        .context("axum server error")?;

    Ok(())
}
