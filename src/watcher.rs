//! Multi-endpoint launchpad log watcher.
//!
//! Subscribes every configured program id to a confirmed-commitment log
//! stream, feeds batches to the decision pipeline from a single ingestion
//! task, and fails over between the primary and backup websocket endpoints
//! on transport-error bursts.

use crate::alerts::Notifier;
use crate::config::Config;
use crate::pipeline::counters::FeedCounters;
use crate::pipeline::Pipeline;
use crate::types::{now_ms, LogBatch, Origin};
use futures::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_sdk::commitment_config::CommitmentConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Transport-error window used for the failover decision.
const ERROR_WINDOW_MS: u64 = 30_000;

/// Errors within the window that push us off the primary endpoint.
const PRIMARY_ERROR_LIMIT: usize = 3;

/// Error-free time on the backup after which the next error sends us back
/// to the primary.
const BACKUP_STABLE_MS: u64 = 10 * 60 * 1000;

const HOUSEKEEPING_EVERY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndpointSet {
    Primary,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    SwitchToBackup,
    SwitchToPrimary,
    Reconnect,
    Shutdown,
}

pub struct LaunchWatcher {
    cfg: Arc<Config>,
    pipeline: Pipeline,
    notifier: Arc<Notifier>,
    counters: FeedCounters,
    endpoint_set: EndpointSet,
    reconnect_attempts: u32,
    error_window: VecDeque<u64>,
    stable_since: u64,
    burst_alerted: bool,
    shutdown: watch::Receiver<bool>,
}

impl LaunchWatcher {
    pub fn new(
        cfg: Arc<Config>,
        pipeline: Pipeline,
        notifier: Arc<Notifier>,
        counters: FeedCounters,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            pipeline,
            notifier,
            counters,
            endpoint_set: EndpointSet::Primary,
            reconnect_attempts: 0,
            error_window: VecDeque::new(),
            stable_since: 0,
            burst_alerted: false,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let subs = self.cfg.subscriptions();
        if subs.is_empty() {
            warn!("no program ids configured, watcher idle");
            return;
        }
        info!(programs = subs.len(), "launch watcher starting");

        loop {
            let ws_url = match self.endpoint_set {
                EndpointSet::Primary => self.cfg.rpc.ws_primary.clone(),
                EndpointSet::Backup => self.cfg.rpc.ws_backup.clone(),
            };
            match self.stream_once(&ws_url, &subs).await {
                StreamEnd::Shutdown => break,
                StreamEnd::SwitchToBackup => {
                    self.endpoint_set = EndpointSet::Backup;
                    self.reconnect_attempts = 0;
                    self.error_window.clear();
                    self.counters.bump_reconnect().await;
                    error!("primary endpoint unstable, switching to backup");
                    self.alert_burst("launch watcher failing over to backup endpoint")
                        .await;
                }
                StreamEnd::SwitchToPrimary => {
                    self.endpoint_set = EndpointSet::Primary;
                    self.reconnect_attempts = 0;
                    self.error_window.clear();
                    self.counters.bump_reconnect().await;
                    info!("backup was stable, switching back to primary endpoint");
                }
                StreamEnd::Reconnect => {
                    self.reconnect_attempts += 1;
                    self.counters.bump_reconnect().await;
                    let delay = backoff_secs(self.reconnect_attempts);
                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_sec = delay,
                        "reconnecting log subscriptions"
                    );
                    self.alert_burst("launch watcher reconnecting after transport error")
                        .await;
                    let mut shutdown = self.shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                        changed = shutdown.changed() => {
                            // A closed channel means the process is going away.
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("launch watcher stopped");
    }

    /// One connection lifetime: spawn a subscription task per program id,
    /// consume batches until shutdown or a transport error forces a
    /// decision.
    async fn stream_once(&mut self, ws_url: &str, subs: &[(String, Origin)]) -> StreamEnd {
        info!(endpoint = ws_url, "connecting log subscriptions");
        let (batch_tx, mut batch_rx) = mpsc::channel::<LogBatch>(1024);
        let (err_tx, mut err_rx) = mpsc::channel::<String>(64);
        let (kill_tx, kill_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(subs.len());
        for (program_id, origin) in subs {
            handles.push(tokio::spawn(subscribe_program(
                ws_url.to_string(),
                program_id.clone(),
                *origin,
                batch_tx.clone(),
                err_tx.clone(),
                kill_rx.clone(),
            )));
        }
        drop(batch_tx);
        drop(err_tx);

        self.stable_since = now_ms();
        let mut shutdown = self.shutdown.clone();
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_EVERY);

        let end = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break StreamEnd::Shutdown;
                    }
                }
                maybe_batch = batch_rx.recv() => match maybe_batch {
                    Some(batch) => {
                        self.burst_alerted = false;
                        self.reconnect_attempts = 0;
                        if let Err(e) = self.pipeline.process_batch(&batch).await {
                            warn!(error = %e, "batch processing failed");
                        }
                    }
                    None => {
                        // Every subscription task is gone.
                        self.counters.bump_ws_error().await;
                        break self.on_transport_error(now_ms());
                    }
                },
                maybe_err = err_rx.recv() => {
                    if let Some(detail) = maybe_err {
                        debug!(detail, "transport error");
                    }
                    self.counters.bump_ws_error().await;
                    break self.on_transport_error(now_ms());
                }
                _ = housekeeping.tick() => {
                    self.pipeline.housekeeping(now_ms()).await;
                }
            }
        };

        let _ = kill_tx.send(true);
        for handle in handles {
            handle.abort();
        }
        end
    }

    fn on_transport_error(&mut self, now: u64) -> StreamEnd {
        self.error_window.push_back(now);
        self.error_window
            .retain(|ts| now.saturating_sub(*ts) <= ERROR_WINDOW_MS);
        match self.endpoint_set {
            EndpointSet::Primary => {
                if self.error_window.len() > PRIMARY_ERROR_LIMIT {
                    StreamEnd::SwitchToBackup
                } else {
                    StreamEnd::Reconnect
                }
            }
            EndpointSet::Backup => {
                if now.saturating_sub(self.stable_since) >= BACKUP_STABLE_MS {
                    StreamEnd::SwitchToPrimary
                } else {
                    StreamEnd::Reconnect
                }
            }
        }
    }

    async fn alert_burst(&mut self, text: &str) {
        if !self.burst_alerted {
            self.burst_alerted = true;
            self.notifier.transport(text).await;
        }
    }
}

/// `min(30s, 2^min(6, attempts - 1) s)`.
fn backoff_secs(attempts: u32) -> u64 {
    (1u64 << attempts.saturating_sub(1).min(6)).min(30)
}

/// One log subscription, forwarding batches until killed or the stream
/// closes. The pubsub connection is per subscription so one bad program id
/// cannot poison the others mid-flight.
async fn subscribe_program(
    ws_url: String,
    program_id: String,
    origin: Origin,
    batch_tx: mpsc::Sender<LogBatch>,
    err_tx: mpsc::Sender<String>,
    mut kill: watch::Receiver<bool>,
) {
    let client = match PubsubClient::new(&ws_url).await {
        Ok(c) => c,
        Err(e) => {
            let _ = err_tx.send(format!("{program_id}: connect failed: {e}")).await;
            return;
        }
    };
    let filter = RpcTransactionLogsFilter::Mentions(vec![program_id.clone()]);
    let config = RpcTransactionLogsConfig {
        commitment: Some(CommitmentConfig::confirmed()),
    };
    let (mut stream, _unsubscribe) = match client.logs_subscribe(filter, config).await {
        Ok(s) => s,
        Err(e) => {
            let _ = err_tx
                .send(format!("{program_id}: subscribe failed: {e}"))
                .await;
            return;
        }
    };
    debug!(program_id, origin = %origin, "log subscription active");

    loop {
        tokio::select! {
            changed = kill.changed() => {
                if changed.is_err() || *kill.borrow() {
                    break;
                }
            }
            item = stream.next() => match item {
                Some(response) => {
                    // Failed transactions carry no usable launch signal.
                    if response.value.err.is_some() {
                        continue;
                    }
                    let batch = LogBatch {
                        origin,
                        program_id: program_id.clone(),
                        signature: response.value.signature,
                        logs: response.value.logs,
                        ts: now_ms(),
                    };
                    if batch_tx.send(batch).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = err_tx.send(format!("{program_id}: stream closed")).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        assert_eq!(backoff_secs(1), 1);
        assert_eq!(backoff_secs(2), 2);
        assert_eq!(backoff_secs(3), 4);
        assert_eq!(backoff_secs(5), 16);
        assert_eq!(backoff_secs(6), 30, "2^5=32 capped at 30");
        assert_eq!(backoff_secs(50), 30);
    }

    #[test]
    fn primary_switches_after_burst() {
        let mut window: VecDeque<u64> = VecDeque::new();
        // Mirror of on_transport_error's window logic at the boundary.
        for ts in [1_000u64, 2_000, 3_000, 4_000] {
            window.push_back(ts);
            window.retain(|t| ts.saturating_sub(*t) <= ERROR_WINDOW_MS);
        }
        assert!(window.len() > PRIMARY_ERROR_LIMIT);
    }
}
