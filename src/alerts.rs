//! Outbound notifications.
//!
//! Telegram is the only transport; when credentials are absent every send
//! becomes a no-op while the side-effect-free counters keep working, so the
//! core pipeline stays testable without a live notifier.

use crate::config::{AlertsConfig, TelegramConfig};
use crate::types::{now_ms, Decision, Origin};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Alert metadata exposed on the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertMeta {
    pub last_alert_ts: u64,
    pub sent_total: u64,
    pub suppressed_total: u64,
    pub summary_counts: HashMap<String, u64>,
}

/// A decision worth telling someone about.
#[derive(Debug, Clone)]
pub struct DecisionAlert {
    pub mint: String,
    pub origin: Origin,
    pub decision: Decision,
    pub score: i32,
    pub tier: Option<&'static str>,
    pub reason: Option<String>,
}

pub struct Notifier {
    cfg: AlertsConfig,
    telegram: Option<(TelegramConfig, Client)>,
    state: Arc<RwLock<AlertMeta>>,
}

impl Notifier {
    pub fn new(cfg: AlertsConfig, telegram: TelegramConfig) -> Self {
        let telegram = if telegram.bot_token.is_empty() || telegram.chat_id.is_empty() {
            None
        } else {
            let client = Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .ok()
                .map(|c| (telegram, c));
            client
        };
        if telegram.is_none() {
            info!("notifier running without telegram credentials, alerts are log-only");
        }
        Self {
            cfg,
            telegram,
            state: Arc::new(RwLock::new(AlertMeta::default())),
        }
    }

    /// Emit a decision alert, honoring the accepted-only and min-score
    /// filters plus the minimum interval between sends.
    pub async fn decision(&self, alert: &DecisionAlert) {
        self.bump_summary(alert.decision.as_str()).await;

        if self.cfg.accepted_only && !alert.decision.is_accept() {
            self.suppress().await;
            return;
        }
        if alert.decision.is_accept() && alert.score < self.cfg.min_score {
            self.suppress().await;
            return;
        }
        let now = now_ms();
        {
            let state = self.state.read().await;
            if state.last_alert_ts > 0
                && now.saturating_sub(state.last_alert_ts) < self.cfg.rate_limit_sec * 1000
            {
                drop(state);
                self.suppress().await;
                return;
            }
        }

        let tier = alert.tier.unwrap_or("-");
        let text = match alert.decision {
            Decision::RejectedFatal => format!(
                "✗ {} [{}] fatal reject: {}",
                alert.mint,
                alert.origin,
                alert.reason.as_deref().unwrap_or("unknown")
            ),
            _ => format!(
                "✓ {} [{}] {} tier={} score={}",
                alert.mint, alert.origin, alert.decision, tier, alert.score
            ),
        };
        self.send(&text).await;
    }

    /// Transport-layer notice (failover, reconnect bursts). The caller
    /// enforces the one-per-burst rule.
    pub async fn transport(&self, text: &str) {
        self.send(text).await;
    }

    /// Pure counter used by the periodic summary.
    pub async fn bump_summary(&self, decision: &str) {
        let mut state = self.state.write().await;
        *state
            .summary_counts
            .entry(decision.to_string())
            .or_insert(0) += 1;
    }

    pub async fn last_alert_ts(&self) -> u64 {
        self.state.read().await.last_alert_ts
    }

    pub async fn meta(&self) -> AlertMeta {
        self.state.read().await.clone()
    }

    async fn suppress(&self) {
        self.state.write().await.suppressed_total += 1;
    }

    async fn send(&self, text: &str) {
        {
            let mut state = self.state.write().await;
            state.last_alert_ts = now_ms();
            state.sent_total += 1;
        }
        match &self.telegram {
            Some((cfg, client)) => {
                let url = format!("https://api.telegram.org/bot{}/sendMessage", cfg.bot_token);
                let body = serde_json::json!({
                    "chat_id": cfg.chat_id,
                    "text": text,
                });
                if let Err(e) = client.post(&url).json(&body).send().await {
                    warn!(error = %e, "telegram send failed");
                }
            }
            None => debug!(alert = text, "alert (log-only)"),
        }
    }

    /// Periodic digest of decision counts since the last summary.
    pub async fn run_summary(self: Arc<Self>) {
        if self.cfg.summary_every_sec == 0 {
            return;
        }
        let mut tick = tokio::time::interval(Duration::from_secs(self.cfg.summary_every_sec));
        tick.tick().await;
        loop {
            tick.tick().await;
            let counts = {
                let mut state = self.state.write().await;
                std::mem::take(&mut state.summary_counts)
            };
            if counts.is_empty() {
                continue;
            }
            let mut parts: Vec<String> =
                counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
            parts.sort();
            self.send(&format!("summary: {}", parts.join(" "))).await;
        }
    }
}
