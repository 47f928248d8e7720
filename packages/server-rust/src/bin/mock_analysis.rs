//! `mock-analysis` binary.
//!
//! Wires the local flow bus to the dispatcher, registers the demo-mode gate,
//! and waits for Ctrl-C / SIGTERM. The mock inference listener only starts
//! once a `DemoMode` flow arrives (via `--demo-mode` or `--stdin-flows`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use mock_analysis_core::{AppSettings, FlowKind, FlowPublisher, LocalFlowBus};
use mock_analysis_server::flow::{DemoModeGate, FlowDispatcher};
use mock_analysis_server::network::{ServerStarter, ShutdownController};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

/// Mock inference server started on demand by the demo-mode flow
#[derive(Parser, Debug)]
#[command(name = "mock-analysis")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON settings file. A missing file is treated as empty.
    #[arg(
        short,
        long,
        env = "MOCK_ANALYSIS_CONFIG",
        default_value = "appsettings.json",
        value_name = "FILE"
    )]
    config: PathBuf,

    /// Directory containing `Data/` with the inference artifacts and label
    #[arg(
        long,
        env = "MOCK_ANALYSIS_CONTENT_ROOT",
        default_value = ".",
        value_name = "DIR"
    )]
    content_root: PathBuf,

    /// Prefix of environment variables overriding settings (`__` maps to `:`)
    #[arg(long, default_value = "MOCK_ANALYSIS_")]
    env_prefix: String,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "MOCK_ANALYSIS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Publish one `DemoMode` flow at startup
    #[arg(long)]
    demo_mode: bool,

    /// Publish a flow for every non-empty line read from stdin
    #[arg(long)]
    stdin_flows: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "MOCK_ANALYSIS_METRICS_ADDR", value_name = "ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_json)?;

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let settings = load_settings(&cli.config, &cli.env_prefix)?;
    let shutdown = Arc::new(ShutdownController::new());

    let starter = ServerStarter::new(
        Arc::new(settings),
        cli.content_root.clone(),
        Arc::clone(&shutdown),
    );
    let gate = Arc::new(DemoModeGate::new(Arc::new(starter)));

    let dispatcher = Arc::new(FlowDispatcher::new());
    let handler_gate = Arc::clone(&gate);
    dispatcher.register(FlowKind::DEMO_MODE, move |_| {
        handler_gate.on_trigger();
        Ok(())
    });

    let (publisher, bus) = LocalFlowBus::new();
    let dispatching = dispatcher.start_dispatching(bus, Arc::clone(&shutdown));

    if cli.demo_mode {
        publisher.publish(FlowKind::DEMO_MODE)?;
    }
    if cli.stdin_flows {
        tokio::spawn(forward_stdin(publisher.clone()));
    }

    shutdown_signal().await?;
    shutdown.trigger_shutdown();

    let stats = dispatching.await.context("flow dispatcher task failed")?;
    info!(received = stats.received, "flow dispatcher joined");

    if let Some(result) = gate.join_listener().await {
        result.context("mock inference server stopped with an error")?;
    }

    drop(publisher);
    info!("mock-analysis exited cleanly");
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

fn load_settings(path: &Path, env_prefix: &str) -> Result<AppSettings> {
    let mut settings = AppSettings::new();
    settings
        .merge_json_file(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    settings.merge_process_env(env_prefix);
    info!(
        path = %path.display(),
        entries = settings.len(),
        "settings loaded"
    );
    Ok(settings)
}

/// Reads flow kind names line by line until stdin closes.
async fn forward_stdin(publisher: FlowPublisher) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let name = line.trim();
                if name.is_empty() {
                    continue;
                }
                if let Err(e) = publisher.publish(FlowKind::new(name)) {
                    warn!(error = %e, "flow bus closed, no longer reading stdin");
                    return;
                }
            }
            Ok(None) => {
                info!("stdin closed, no more flows will be read");
                return;
            }
            Err(e) => {
                error!(error = %e, "failed to read flow from stdin");
                return;
            }
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to install Ctrl+C handler")?;
                info!("Received Ctrl+C signal");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}
