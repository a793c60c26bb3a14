//! Syncer Daemon - a minimal controller built on syncer-core.
//!
//! Reads newline-delimited JSON object events from stdin, caches them in an
//! indexed store, and reconciles each changed object on a worker pool. On EOF
//! or Ctrl-C the syncer drains and the attempt ledger is printed as JSON.

mod config;
mod error;
mod protocol;
mod reconciler;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::InputEvent;
use crate::reconciler::TenantStore;
use syncer_core::{stop_channel, Service, SyncerBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncer_daemon=info,syncer_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        name = %config.name,
        workers = config.syncer.workers,
        retry_limit = config.syncer.retry_limit,
        "Starting syncer daemon"
    );

    run(config).await?;
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let store = reconciler::tenant_store();

    let handler_store = store.clone();
    let syncer = SyncerBuilder::new(config.name.clone())
        .config(config.syncer.clone())
        .key_source(store.clone())
        .workqueue(move |key: String| reconciler::reconcile(handler_store.clone(), key))?;

    let (stop, signal) = stop_channel();
    let done = syncer.run(signal);

    feed(&store, &syncer).await?;

    stop.stop();
    done.await?;

    let records = syncer.get_records();
    let failed = records.iter().filter(|r| !r.outcome.is_success()).count();
    tracing::info!(attempts = records.len(), failed, "Syncer drained");

    if config.dump_ledger {
        println!("{}", serde_json::to_string_pretty(&records)?);
    }
    Ok(())
}

/// Read events until EOF or Ctrl-C, triggering a sync for each.
async fn feed(store: &TenantStore, syncer: &impl Service) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted; shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            tracing::info!("Input closed; shutting down");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let applied = InputEvent::parse(&line)
            .map_err(Into::into)
            .and_then(|event| {
                tracing::debug!(key = event.id(), "Applying event");
                reconciler::apply(store, event)
            });
        let key = match applied {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping input line");
                continue;
            }
        };

        if !syncer.trigger(&key, false) {
            tracing::warn!(key = %key, "Syncer rejected trigger");
        }
    }
}
