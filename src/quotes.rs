//! Pump-curve quote sampling.
//!
//! For every live mint with an observed price, periodically estimate the
//! fill price and slippage of the configured entry sizes against a
//! constant-product curve seeded from the last trade price, and persist
//! the estimates for offline analysis.

use crate::config::QuotesConfig;
use crate::pipeline::MicroSummary;
use crate::storage::{LedgerStore, QuoteRow};
use crate::types::now_ms;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

/// Virtual SOL depth of a fresh pump-style bonding curve.
const VIRTUAL_SOL_RESERVE: f64 = 30.0;

pub struct QuoteSampler {
    cfg: QuotesConfig,
    store: Arc<dyn LedgerStore>,
    summary: Arc<RwLock<MicroSummary>>,
    shutdown: watch::Receiver<bool>,
}

/// One estimated fill against the curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveQuote {
    pub fill_price: f64,
    pub slippage_bps: f64,
    pub virtual_sol: f64,
    pub virtual_tokens: f64,
}

/// Constant-product fill estimate for a buy of `size_sol` at `spot`.
pub fn estimate_fill(spot: f64, size_sol: f64) -> Option<CurveQuote> {
    if spot <= 0.0 || size_sol <= 0.0 {
        return None;
    }
    let virtual_sol = VIRTUAL_SOL_RESERVE;
    let virtual_tokens = virtual_sol / spot;
    let k = virtual_sol * virtual_tokens;
    let new_sol = virtual_sol + size_sol;
    let new_tokens = k / new_sol;
    let tokens_out = virtual_tokens - new_tokens;
    if tokens_out <= 0.0 {
        return None;
    }
    let fill_price = size_sol / tokens_out;
    let slippage_bps = (fill_price / spot - 1.0) * 10_000.0;
    Some(CurveQuote {
        fill_price,
        slippage_bps,
        virtual_sol,
        virtual_tokens,
    })
}

impl QuoteSampler {
    pub fn new(
        cfg: QuotesConfig,
        store: Arc<dyn LedgerStore>,
        summary: Arc<RwLock<MicroSummary>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cfg,
            store,
            summary,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        if !self.cfg.enabled {
            return;
        }
        let mut tick = tokio::time::interval(Duration::from_millis(self.cfg.interval_ms.max(250)));
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => self.sample_once().await,
            }
        }
        debug!("quote sampler stopped");
    }

    async fn sample_once(&self) {
        let now = now_ms();
        let max_age_ms = self.cfg.max_minutes * 60_000;
        let active = self.summary.read().await.active.clone();
        for mint in active {
            let Some(spot) = mint.last_price else {
                continue;
            };
            if max_age_ms > 0 && now.saturating_sub(mint.first_seen_ts) > max_age_ms {
                continue;
            }
            for &size_sol in &self.cfg.sizes_sol {
                let Some(quote) = estimate_fill(spot, size_sol) else {
                    continue;
                };
                let row = QuoteRow {
                    ts: now,
                    mint: mint.mint.clone(),
                    origin: mint.origin,
                    route: "pump-curve".to_string(),
                    size_sol,
                    est_fill_price_sol: Some(quote.fill_price),
                    est_slippage_bps: Some(quote.slippage_bps),
                    reserves_json: serde_json::to_string(&serde_json::json!({
                        "virtual_sol": quote.virtual_sol,
                        "virtual_tokens": quote.virtual_tokens,
                    }))
                    .ok(),
                };
                if let Err(e) = self.store.insert_quote(&row).await {
                    warn!(mint = %mint.mint, error = %e, "quote insert failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_price_is_above_spot() {
        let q = estimate_fill(0.000002, 0.5).unwrap();
        assert!(q.fill_price > 0.000002);
        assert!(q.slippage_bps > 0.0);
    }

    #[test]
    fn bigger_size_pays_more_slippage() {
        let small = estimate_fill(0.000002, 0.1).unwrap();
        let big = estimate_fill(0.000002, 1.0).unwrap();
        assert!(big.slippage_bps > small.slippage_bps);
    }

    #[test]
    fn degenerate_inputs_yield_no_quote() {
        assert!(estimate_fill(0.0, 0.1).is_none());
        assert!(estimate_fill(0.000002, 0.0).is_none());
        assert!(estimate_fill(-1.0, 0.1).is_none());
    }
}
