mod controller;
mod core;
mod gateway;
mod listener;
mod liveness;

use clap::Parser;
use stage_proto::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Relay stage-controller OSC state to browser displays over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "stage-bridge", version)]
struct Args {
    /// Config file (defaults to the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,
    /// UDP port for controller traffic.
    #[arg(long)]
    osc_port: Option<u16>,
    /// TCP port for push-stream clients.
    #[arg(long)]
    ws_port: Option<u16>,
    /// Controller address as host:port.
    #[arg(long)]
    controller: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(port) = self.osc_port {
            config.bridge.osc_port = port;
        }
        if let Some(port) = self.ws_port {
            config.bridge.ws_port = port;
        }
        if let Some(addr) = &self.controller {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| anyhow::anyhow!("--controller must be host:port, got {}", addr))?;
            config.controller.host = host.to_string();
            config.controller.port = port.parse()?;
        }
        Ok(())
    }
}

// Single-threaded on purpose: every handler runs to completion on one loop.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = stage_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("bridge.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stage_bridge=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    args.apply(&mut config)?;
    info!(
        "Controller {} / OSC port {} / push-stream port {}",
        config.controller.address(),
        config.bridge.osc_port,
        config.bridge.ws_port
    );

    let controller_addr = tokio::net::lookup_host(config.controller.address())
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("cannot resolve {}", config.controller.address()))?;

    let socket = Arc::new(
        UdpSocket::bind((config.bridge.bind_address.as_str(), config.bridge.osc_port)).await?,
    );

    let controller = controller::Controller::new(
        Box::new(controller::UdpControlLink::new(socket.clone(), controller_addr)),
        config.subscription(),
    );

    // Event channel: listener, gateway sockets and signals all funnel into BridgeCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::BridgeEvent>(256);
    let cancel = CancellationToken::new();

    let listener_handle = listener::start_listener(socket, event_tx.clone(), cancel.clone());
    let gateway_handle = gateway::start_server(
        config.bridge.bind_address.clone(),
        config.bridge.ws_port,
        event_tx.clone(),
        cancel.clone(),
    );

    let signal_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = signal_tx.send(core::BridgeEvent::Shutdown).await;
        }
    });
    drop(event_tx);

    let bridge_core = core::BridgeCore::new(&config.bridge, controller);
    info!("Bridge initialised, running event loop");
    bridge_core.run(event_rx).await?;

    cancel.cancel();
    let grace = config.bridge.shutdown_grace();
    let _ = tokio::time::timeout(grace, listener_handle).await;
    let _ = tokio::time::timeout(grace, gateway_handle).await;
    info!("Bridge stopped");

    Ok(())
}
