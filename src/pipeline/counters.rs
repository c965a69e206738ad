//! Process-wide feed counters.
//!
//! Monotonic totals plus a day-scoped decision section that resets every
//! 24 hours. Cloneable handle backed by a shared lock so the status
//! endpoint can read a consistent copy while the ingestion task writes.

use crate::types::Origin;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Counter snapshot, also the internal representation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CounterState {
    pub events_total: u64,
    pub per_origin: HashMap<String, u64>,
    pub last_event_ts: u64,

    pub parse_miss: u64,
    pub invalid_mint: u64,
    pub dup_dropped: u64,
    pub micro_drops: u64,
    pub tx_fetch_errors: u64,
    pub rate_capped: u64,
    pub ws_errors: u64,
    pub reconnects: u64,

    pub accepts_24h: u64,
    pub rejects_24h: u64,
    pub soft_24h: u64,
    pub pending_24h: u64,
    pub day_reset_ts: u64,
}

/// Cloneable handle over the shared counter state.
#[derive(Clone)]
pub struct FeedCounters {
    state: Arc<RwLock<CounterState>>,
}

impl FeedCounters {
    pub fn new(now_ms: u64) -> Self {
        let mut state = CounterState::default();
        state.day_reset_ts = now_ms;
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Zero the day-scoped counters once 24 h have elapsed.
    fn roll_day(state: &mut CounterState, now_ms: u64) {
        if now_ms.saturating_sub(state.day_reset_ts) > DAY_MS {
            state.accepts_24h = 0;
            state.rejects_24h = 0;
            state.soft_24h = 0;
            state.pending_24h = 0;
            state.day_reset_ts = now_ms;
        }
    }

    pub async fn record_event(&self, origin: Origin, now_ms: u64) {
        let mut s = self.state.write().await;
        Self::roll_day(&mut s, now_ms);
        s.events_total += 1;
        *s.per_origin.entry(origin.as_str().to_string()).or_insert(0) += 1;
        s.last_event_ts = now_ms;
    }

    pub async fn bump_parse_miss(&self) {
        self.state.write().await.parse_miss += 1;
    }

    pub async fn bump_invalid_mint(&self) {
        self.state.write().await.invalid_mint += 1;
    }

    pub async fn bump_dup(&self) {
        self.state.write().await.dup_dropped += 1;
    }

    pub async fn bump_micro_drop(&self) {
        self.state.write().await.micro_drops += 1;
    }

    pub async fn bump_tx_fetch_error(&self) {
        self.state.write().await.tx_fetch_errors += 1;
    }

    pub async fn bump_rate_capped(&self) {
        self.state.write().await.rate_capped += 1;
    }

    pub async fn bump_ws_error(&self) {
        self.state.write().await.ws_errors += 1;
    }

    pub async fn bump_reconnect(&self) {
        self.state.write().await.reconnects += 1;
    }

    pub async fn bump_accept(&self, now_ms: u64) {
        let mut s = self.state.write().await;
        Self::roll_day(&mut s, now_ms);
        s.accepts_24h += 1;
    }

    pub async fn bump_fatal_reject(&self, now_ms: u64) {
        let mut s = self.state.write().await;
        Self::roll_day(&mut s, now_ms);
        s.rejects_24h += 1;
    }

    pub async fn bump_soft_reject(&self, now_ms: u64) {
        let mut s = self.state.write().await;
        Self::roll_day(&mut s, now_ms);
        s.soft_24h += 1;
    }

    pub async fn bump_pending(&self, now_ms: u64) {
        let mut s = self.state.write().await;
        Self::roll_day(&mut s, now_ms);
        s.pending_24h += 1;
    }

    /// Opportunistic day roll, called from housekeeping ticks.
    pub async fn maybe_roll_day(&self, now_ms: u64) {
        let mut s = self.state.write().await;
        Self::roll_day(&mut s, now_ms);
    }

    pub async fn snapshot(&self) -> CounterState {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn day_counters_reset_after_24h() {
        let counters = FeedCounters::new(1_000);
        counters.bump_accept(2_000).await;
        counters.bump_soft_reject(2_000).await;
        let snap = counters.snapshot().await;
        assert_eq!(snap.accepts_24h, 1);
        assert_eq!(snap.soft_24h, 1);

        // One ms past the 24h boundary relative to creation.
        counters.bump_accept(1_000 + DAY_MS + 1).await;
        let snap = counters.snapshot().await;
        assert_eq!(snap.accepts_24h, 1, "reset then incremented");
        assert_eq!(snap.soft_24h, 0);
    }

    #[tokio::test]
    async fn per_origin_counts_accumulate() {
        let counters = FeedCounters::new(0);
        counters.record_event(Origin::Pumpfun, 10).await;
        counters.record_event(Origin::Pumpfun, 20).await;
        counters.record_event(Origin::Orca, 30).await;
        let snap = counters.snapshot().await;
        assert_eq!(snap.events_total, 3);
        assert_eq!(snap.per_origin.get("pumpfun"), Some(&2));
        assert_eq!(snap.per_origin.get("orca"), Some(&1));
        assert_eq!(snap.last_event_ts, 30);
    }
}
