//! Logical-replication CDC ingester: attaches to a PostgreSQL logical
//! replication slot, decodes `pgoutput` messages, and publishes the
//! resulting events to an in-process subscriber (stdout by default).

mod buffer;
mod config;
mod connection;
mod errors;
mod event;
mod parser;
mod relation;
mod session;
mod tuple;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Args, ReplicationConfig};
use connection::PgConnector;
use event::StdoutPublisher;
use session::SessionManager;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = ReplicationConfig::resolve(&args).context("failed to resolve configuration")?;
    info!(slot = %config.slot_name, publication = %config.publication_name, "starting replication ingester");

    let shutdown_signal = Arc::new(AtomicBool::new(false));
    install_shutdown_handler(shutdown_signal.clone());

    let connector = Arc::new(PgConnector::new(
        config.connection_string.clone(),
        config.slot_name.clone(),
        config.publication_name.clone(),
    ));
    let publisher = Arc::new(StdoutPublisher);
    let status_interval = config.status_interval;

    let result = tokio::task::spawn_blocking(move || {
        let runtime = tokio::runtime::Handle::current();
        runtime.block_on(async move {
            let manager = SessionManager::new(connector, publisher, shutdown_signal, status_interval);
            manager.run().await
        })
    })
    .await;

    match result {
        Ok(Ok(())) => {
            info!("replication ingester shut down gracefully");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "replication ingester failed");
            Err(e.into())
        }
        Err(join_err) => {
            error!(error = %join_err, "replication worker task panicked");
            Err(join_err.into())
        }
    }
}

fn init_tracing(log_format: config::LogFormatArg) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_target(false);

    match log_format {
        config::LogFormatArg::Pretty => subscriber.init(),
        config::LogFormatArg::Json => subscriber.json().init(),
    }
}

fn install_shutdown_handler(shutdown_signal: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal, finishing current work and exiting");
            shutdown_signal.store(true, Ordering::SeqCst);
        }
    });
}
