mod api;

use std::future::IntoFuture;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bridgetap_capture::{CaptureSession, Collector, TsharkCaptureEngine};
use bridgetap_core::network::NetworkId;
use bridgetap_storage::MemoryPacketBuffer;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ─────────────────────────────────────────────────────────────────────────────
// CLI
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "bridgetap",
    about = "Capture HTTP traffic on a Docker bridge network",
    version
)]
struct Cli {
    /// ID of the Docker network to capture: the full 64-character ID or the
    /// 12-character short ID.
    #[arg(long, env = "NETWORK_ID")]
    network_id: Option<String>,

    /// Port for the HTTP API. A free port is picked when omitted.
    #[arg(short, long, env = "FIXED_API_PORT")]
    port: Option<u16>,

    /// Address the HTTP API binds to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// File the chosen API port is written to.
    #[arg(long, value_name = "PATH", default_value = "API_PORT")]
    port_file: PathBuf,

    /// tshark executable used for capturing.
    #[arg(long, env = "TSHARK_PATH", value_name = "PATH", default_value = "tshark")]
    tshark: PathBuf,
}

const DEFAULT_LOG_FILTER: &str = "info,bridgetap=debug,bridgetap_capture=debug,bridgetap_storage=debug";

/// How long to wait for the capture task after stopping it.
const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let network_id = NetworkId::parse(cli.network_id.as_deref())?;
    info!(network = %network_id, "will capture packets for network");

    let store = Arc::new(MemoryPacketBuffer::new());
    let engine = TsharkCaptureEngine::new(cli.tshark.clone());
    // The interface inventory runs `tshark -D` synchronously.
    let session = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || CaptureSession::new(network_id, Box::new(engine), store))
            .await??
    };
    let session = Arc::new(session);
    let collector = Collector::new(store, session.handle());

    let mut capture = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    let addr = SocketAddr::new(cli.bind, cli.port.unwrap_or(0));
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    export_port(&cli.port_file, port)?;
    info!("HTTP API listening on {}:{}", cli.bind, port);

    let server = axum::serve(listener, api::router(collector.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::pin!(server);

    let capture_ended = tokio::select! {
        res = &mut server => {
            res?;
            None
        }
        res = &mut capture => Some(res),
    };

    match capture_ended {
        // Capture is over but already captured packets can still be collected.
        Some(res) => {
            res??;
            warn!("capture ended, serving captured packets until shutdown");
            server.await?;
        }
        None => {
            collector.stop();
            match tokio::time::timeout(CAPTURE_STOP_TIMEOUT, capture).await {
                Ok(res) => res??,
                Err(_) => warn!("capture did not stop within {CAPTURE_STOP_TIMEOUT:?}"),
            }
        }
    }

    info!("bridgetap stopped");
    Ok(())
}

/// Write the API port so callers can find the randomly chosen one.
fn export_port(path: &Path, port: u16) -> anyhow::Result<()> {
    std::fs::write(path, port.to_string())?;
    info!("exported port {port} to file '{}'", path.display());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
