//! Per-mint microstructure tracking over the first minutes of a token's
//! life.
//!
//! Each tracked mint keeps a bounded ring of recent events plus funder
//! counts and a price-jump counter; the derived [`Snapshot`] feeds the
//! safety gate and conviction scorer. States expire two minutes after the
//! last observed event.

use crate::pipeline::validator::MintValidator;
use crate::types::{Origin, Snapshot};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Ring capacity per mint.
const MAX_EVENTS: usize = 100;

/// Relative price change that counts as a jump.
const JUMP_THRESHOLD: f64 = 0.10;

/// Default state TTL.
pub const DEFAULT_TTL_MS: u64 = 120_000;

/// Minimum interval that forces a `changed` emission even when the derived
/// values are stable.
const EMIT_INTERVAL_MS: u64 = 5_000;

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:price|p)[=:]\s*([0-9]*\.?[0-9]+)").expect("price regex"));

static B58_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[1-9A-HJ-NP-Za-km-z]{32,44}\b").expect("base58 regex"));

#[derive(Debug, Clone)]
struct MicroEvent {
    ts: u64,
    raw_line: String,
    funder: Option<String>,
    price: Option<f64>,
}

#[derive(Debug)]
struct MintMicro {
    origin: Origin,
    first_seen_ts: u64,
    last_seen_ts: u64,
    events: VecDeque<MicroEvent>,
    funder_counts: HashMap<String, u32>,
    price_jumps: u32,
    last_price: Option<f64>,
    last_emit_ts: Option<u64>,
    last_snapshot: Option<Snapshot>,
}

impl MintMicro {
    fn new(origin: Origin, ts: u64) -> Self {
        Self {
            origin,
            first_seen_ts: ts,
            last_seen_ts: ts,
            events: VecDeque::new(),
            funder_counts: HashMap::new(),
            price_jumps: 0,
            last_price: None,
            last_emit_ts: None,
            last_snapshot: None,
        }
    }

    fn derive(&self, ts: u64) -> Snapshot {
        let buyers = self.events.len();
        let unique_funders = self.funder_counts.len();
        let same_funder_ratio = if buyers == 0 {
            0.0
        } else {
            let max = self.funder_counts.values().copied().max().unwrap_or(0);
            (max as f64 / buyers as f64).min(1.0)
        };
        Snapshot {
            buyers,
            unique_funders,
            same_funder_ratio,
            price_jumps: self.price_jumps,
            depth_est: (buyers as f64 / 20.0).clamp(0.0, 1.0),
            last_ts: ts,
        }
    }
}

/// Result of ingesting one event for a mint.
#[derive(Debug, Clone)]
pub struct TrackResult {
    pub funder: Option<String>,
    pub snapshot: Snapshot,
    pub changed: bool,
}

/// Summary published for the status endpoint and quote sampler.
#[derive(Debug, Clone)]
pub struct ActiveMint {
    pub mint: String,
    pub origin: Origin,
    pub first_seen_ts: u64,
    pub last_price: Option<f64>,
    pub buyers: usize,
}

#[derive(Default)]
pub struct MicrostructureTracker {
    states: HashMap<String, MintMicro>,
    evicted_total: u64,
}

impl MicrostructureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one raw log line for `mint`. Returns `None` when the mint
    /// fails the shape test (the caller counts the drop).
    pub fn track(
        &mut self,
        mint: &str,
        origin: Origin,
        ts: u64,
        raw_line: &str,
        validator: &MintValidator,
    ) -> Option<TrackResult> {
        if !validator.is_valid_mint(mint) {
            return None;
        }

        let state = self
            .states
            .entry(mint.to_string())
            .or_insert_with(|| MintMicro::new(origin, ts));
        state.last_seen_ts = ts;

        let funder = B58_RE
            .find_iter(raw_line)
            .map(|m| m.as_str())
            .find(|c| *c != mint && validator.is_valid_mint(c))
            .map(|s| s.to_string());
        if let Some(f) = &funder {
            *state.funder_counts.entry(f.clone()).or_insert(0) += 1;
        }

        let price = PRICE_RE
            .captures(raw_line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok());
        if let (Some(last), Some(p)) = (state.last_price, price) {
            if last > 0.0 && ((p - last).abs() / last) >= JUMP_THRESHOLD {
                state.price_jumps += 1;
            }
        }
        if price.is_some() {
            state.last_price = price;
        }

        state.events.push_back(MicroEvent {
            ts,
            raw_line: raw_line.to_string(),
            funder: funder.clone(),
            price,
        });
        if state.events.len() > MAX_EVENTS {
            if let Some(dropped) = state.events.pop_front() {
                if let Some(f) = dropped.funder {
                    if let Some(count) = state.funder_counts.get_mut(&f) {
                        *count -= 1;
                        if *count == 0 {
                            state.funder_counts.remove(&f);
                        }
                    }
                }
            }
        }

        let snapshot = state.derive(ts);
        let changed = match &state.last_snapshot {
            None => true,
            Some(prev) => {
                snapshot.buyers != prev.buyers
                    || snapshot.unique_funders != prev.unique_funders
                    || snapshot.price_jumps != prev.price_jumps
                    || (snapshot.depth_est - prev.depth_est).abs() >= 0.02
                    || (snapshot.same_funder_ratio - prev.same_funder_ratio).abs() >= 0.02
                    || ts.saturating_sub(state.last_emit_ts.unwrap_or(0)) > EMIT_INTERVAL_MS
            }
        };
        if changed {
            state.last_snapshot = Some(snapshot);
            state.last_emit_ts = Some(ts);
        }

        Some(TrackResult {
            funder,
            snapshot,
            changed,
        })
    }

    /// Deterministic read; zeros for an unknown mint.
    pub fn snapshot(&self, mint: &str) -> Snapshot {
        self.states
            .get(mint)
            .map(|s| s.derive(s.last_seen_ts))
            .unwrap_or_default()
    }

    /// Drop every state whose last event is older than `ttl_ms`.
    pub fn expire(&mut self, now_ms: u64, ttl_ms: u64) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, s| now_ms.saturating_sub(s.last_seen_ts) <= ttl_ms);
        let evicted = before - self.states.len();
        if evicted > 0 {
            self.evicted_total += evicted as u64;
            debug!(evicted, tracked = self.states.len(), "expired stale microstructure states");
        }
        evicted
    }

    pub fn tracked_mints(&self) -> usize {
        self.states.len()
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Live mints with enough context for quote sampling.
    pub fn active_mints(&self) -> Vec<ActiveMint> {
        self.states
            .iter()
            .map(|(mint, s)| ActiveMint {
                mint: mint.clone(),
                origin: s.origin,
                first_seen_ts: s.first_seen_ts,
                last_price: s.last_price,
                buyers: s.events.len(),
            })
            .collect()
    }

    #[cfg(test)]
    fn ring_len(&self, mint: &str) -> usize {
        self.states.get(mint).map(|s| s.events.len()).unwrap_or(0)
    }
}
