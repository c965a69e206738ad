//! Process entry point: wire configuration, storage, alerting, the
//! introspection worker, the status endpoint and the launch watcher
//! together, then run until interrupted.

use anyhow::{Context, Result};
use mintwatch::alerts::Notifier;
use mintwatch::config::{Config, TxLookupMode};
use mintwatch::pipeline::counters::FeedCounters;
use mintwatch::pipeline::entry::{DecisionLog, EntryEngine};
use mintwatch::pipeline::introspect::TxIntrospector;
use mintwatch::pipeline::validator::MintValidator;
use mintwatch::pipeline::Pipeline;
use mintwatch::quotes::QuoteSampler;
use mintwatch::status::StatusServer;
use mintwatch::storage::{LedgerStore, SqliteStore};
use mintwatch::types::now_ms;
use mintwatch::watcher::LaunchWatcher;
use solana_client::nonblocking::rpc_client::RpcClient;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env().context("configuration load failed")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "mintwatch starting");
    let cfg = Arc::new(cfg);

    if let Some(dir) = std::path::Path::new(&cfg.db_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create data directory {}", dir.display()))?;
        }
    }
    let store: Arc<dyn LedgerStore> = Arc::new(SqliteStore::open(&cfg.db_path).await?);

    let notifier = Arc::new(Notifier::new(cfg.alerts.clone(), cfg.telegram.clone()));
    tokio::spawn(notifier.clone().run_summary());

    let counters = FeedCounters::new(now_ms());
    let decision_log = DecisionLog::default();

    let rpc = Arc::new(RpcClient::new(cfg.rpc.http_primary.clone()));
    let validator = MintValidator::new(
        cfg.programs.all_ids(),
        Some(rpc.clone()),
        cfg.mint_verify.ttl_sec,
    );

    let introspector = if cfg.tx_lookup.mode == TxLookupMode::Off {
        None
    } else {
        let (handle, worker) = TxIntrospector::new(
            cfg.tx_lookup.clone(),
            rpc.clone(),
            validator.clone(),
            counters.clone(),
        );
        tokio::spawn(worker.run());
        Some(handle)
    };

    let engine = EntryEngine::new(
        cfg.entry.clone(),
        cfg.sizes.clone(),
        cfg.cohort.clone(),
        cfg.dry_run,
        store.clone(),
        notifier.clone(),
        counters.clone(),
        decision_log.clone(),
    );
    let pipeline = Pipeline::new(
        cfg.clone(),
        validator,
        engine,
        introspector,
        store.clone(),
        counters.clone(),
    );
    let summary = pipeline.summary_handle();

    let status = StatusServer {
        port: cfg.http_port,
        store: store.clone(),
        counters: counters.clone(),
        decision_log: decision_log.clone(),
        summary: summary.clone(),
        notifier: notifier.clone(),
        subscribed_programs: cfg.subscriptions().len(),
    };
    tokio::spawn(async move {
        if let Err(e) = status.run().await {
            error!(error = %e, "status endpoint failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive so a failed signal hook does not
                // read as a shutdown to the receivers.
                error!(error = %e, "ctrl-c handler failed");
                std::future::pending::<()>().await;
            }
        }
    });

    let sampler = QuoteSampler::new(
        cfg.quotes.clone(),
        store.clone(),
        summary,
        shutdown_rx.clone(),
    );
    tokio::spawn(sampler.run());

    let watcher = LaunchWatcher::new(
        cfg.clone(),
        pipeline,
        notifier,
        counters,
        shutdown_rx,
    );
    watcher.run().await;

    info!("shutdown complete");
    Ok(())
}
