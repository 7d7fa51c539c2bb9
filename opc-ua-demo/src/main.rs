mod browse;
mod device_tree;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use opc_ua_engine::{
    AttributeId, DataChange, EngineConfig, Event, LocalProvider, MonitoringParameters,
    SubscriptionHandler, SubscriptionId, SubscriptionState, UaServer, Variant,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(about = "Demo server and browser for the opc-ua-engine address space", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Endpoint URL, recorded as the server URI (namespace 1)
    #[arg(long, global = true, default_value = "opc.tcp://127.0.0.1:48401/")]
    endpoint: String,

    /// Also write a daily rolling log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the device tree and run the value/event loop
    Server {
        /// Default publishing interval of subscriptions
        #[arg(long, default_value_t = 100)]
        publish_ms: u64,

        /// Period of the counter and event loop
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,

        /// Stop after this many iterations instead of waiting for Ctrl-C
        #[arg(long)]
        iterations: Option<u32>,

        /// Subscribe locally to MyVariable and log its data changes
        #[arg(long, default_value_t = false)]
        subscribe: bool,
    },
    /// Build the device tree and print it recursively
    Browse {
        /// Maximum depth below Objects
        #[arg(long, default_value_t = 16)]
        depth: usize,
    },
}

fn init_logging(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "opc-ua-demo.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(fmt::layer().with_writer(non_blocking).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

/// Logs every notification of the in-process subscription.
struct LogHandler;

#[async_trait]
impl SubscriptionHandler for LogHandler {
    async fn data_change(&self, change: DataChange) -> Result<()> {
        tracing::info!(
            node = %change.node_id,
            value = %change.value,
            status = ?change.status,
            "Received DataChange event"
        );
        Ok(())
    }

    async fn status_change(&self, subscription: SubscriptionId, state: SubscriptionState) {
        tracing::debug!(%subscription, %state, "subscription state changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command, common } = Cli::parse();
    let _guard = init_logging(common.log_dir.as_ref());

    tracing::info!("Starting OPC UA demo");

    let result = match command {
        Commands::Server {
            publish_ms,
            interval_ms,
            iterations,
            subscribe,
        } => {
            let config = EngineConfig::default()
                .with_server_uri(common.endpoint)
                .with_default_publishing_interval(Duration::from_millis(publish_ms));
            run_server(
                config,
                Duration::from_millis(interval_ms.max(1)),
                iterations,
                subscribe,
            )
            .await
        }
        Commands::Browse { depth } => {
            run_browse(EngineConfig::default().with_server_uri(common.endpoint), depth).await
        }
    };

    if let Err(err) = &result {
        tracing::error!(error = ?err, "Application error");
    }
    result
}

async fn run_server(
    config: EngineConfig,
    interval: Duration,
    iterations: Option<u32>,
    subscribe: bool,
) -> Result<()> {
    let server = UaServer::new(config);
    let tree = device_tree::build(&server)?;
    for branch in &tree.branches {
        device_tree::log_children(&server, branch)?;
    }
    device_tree::log_children(&server, &tree.custom_object)?;

    if subscribe {
        let sub = server
            .subscriptions()
            .create_subscription(Duration::ZERO, Arc::new(LogHandler))?;
        server.subscriptions().subscribe_data_change(
            sub,
            &tree.my_variable,
            AttributeId::Value,
            MonitoringParameters::new(1),
        )?;
    }

    let clock = server.spawn_clock(Duration::from_secs(1))?;
    server.enable_event_notification()?;

    tracing::info!("Ctrl-C to exit");
    let mut ticker = tokio::time::interval(interval);
    let mut counter: i32 = 8;
    let mut done = 0u32;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for Ctrl-C")?;
                tracing::info!("Ctrl-C received");
                break;
            }
        }

        counter = counter.wrapping_add(1);
        server.write(&tree.my_variable, AttributeId::Value, Variant::Int32(counter))?;
        let event = Event::server_event(format!("This is event number: {counter}"))
            .with_severity(2)
            .with_source_name("Event from opc-ua-demo");
        let receivers = server.trigger_event(event)?;
        tracing::debug!(counter, receivers, "tick");

        done += 1;
        if iterations.is_some_and(|limit| done >= limit) {
            break;
        }
    }

    clock.abort();
    server.shutdown().await;
    Ok(())
}

async fn run_browse(config: EngineConfig, depth: usize) -> Result<()> {
    let server = Arc::new(UaServer::new(config));
    device_tree::build(&server)?;
    let provider = LocalProvider::new(Arc::clone(&server))?;

    let mut stdout = std::io::stdout().lock();
    let printed = browse::print_tree(&provider, &server.objects_node(), depth, &mut stdout).await?;
    browse::print_namespaces(&provider, &mut stdout).await?;
    tracing::info!(printed, "browse completed");
    Ok(())
}
