//! Market-heat controller.
//!
//! Tracks distinct accepted mints in a minute-indexed ring and converts the
//! rolling accepts-per-hour rate into a band (COLD/NEUTRAL/HOT) that
//! loosens or tightens the entry thresholds. The apex threshold never
//! drifts with heat.

use crate::config::HeatConfig;
use crate::types::{EffectiveThresholds, HeatBand};
use std::collections::HashSet;
use tracing::debug;

const MINUTE_MS: u64 = 60_000;

struct MinuteBucket {
    minute: u64,
    mints: HashSet<String>,
}

pub struct HeatController {
    cfg: HeatConfig,
    base_min_score: i32,
    base_apex_score: i32,
    base_min_buyers: i32,
    base_min_unique: i32,
    buckets: Vec<MinuteBucket>,
}

impl HeatController {
    pub fn new(
        cfg: HeatConfig,
        base_min_score: i32,
        base_apex_score: i32,
        base_min_buyers: usize,
        base_min_unique: usize,
    ) -> Self {
        // The ring always spans at least an hour so an hourly rate is
        // available even for short windows.
        let len = cfg.window_min.max(60) as usize;
        let buckets = (0..len)
            .map(|_| MinuteBucket {
                minute: u64::MAX,
                mints: HashSet::new(),
            })
            .collect();
        Self {
            cfg,
            base_min_score,
            base_apex_score,
            base_min_buyers: base_min_buyers as i32,
            base_min_unique: base_min_unique as i32,
            buckets,
        }
    }

    fn bucket_mut(&mut self, minute: u64) -> &mut MinuteBucket {
        let len = self.buckets.len() as u64;
        let idx = (minute % len) as usize;
        let bucket = &mut self.buckets[idx];
        if bucket.minute != minute {
            bucket.minute = minute;
            bucket.mints.clear();
        }
        bucket
    }

    /// Record a first accept of `mint`.
    pub fn record_accept(&mut self, mint: &str, ts_ms: u64) {
        let minute = ts_ms / MINUTE_MS;
        let inserted = self.bucket_mut(minute).mints.insert(mint.to_string());
        if inserted {
            debug!(mint, minute, "heat tick recorded");
        }
    }

    /// Distinct accepted mints over the configured window, scaled to an
    /// hourly rate.
    pub fn accepts_per_hour(&self, ts_ms: u64) -> f64 {
        let window = self.cfg.window_min.max(1) as u64;
        let distinct = self.distinct_in_window(ts_ms, window);
        distinct as f64 * 60.0 / window as f64
    }

    /// Auxiliary 60-minute distinct count (the ring is always big enough).
    pub fn accepts_last_hour(&self, ts_ms: u64) -> usize {
        self.distinct_in_window(ts_ms, 60)
    }

    fn distinct_in_window(&self, ts_ms: u64, window_min: u64) -> usize {
        let now_minute = ts_ms / MINUTE_MS;
        let len = self.buckets.len() as u64;
        let mut union: HashSet<&str> = HashSet::new();
        for back in 0..window_min.min(len) {
            let Some(minute) = now_minute.checked_sub(back) else {
                break;
            };
            let bucket = &self.buckets[(minute % len) as usize];
            if bucket.minute == minute {
                for m in &bucket.mints {
                    union.insert(m.as_str());
                }
            }
        }
        union.len()
    }

    pub fn band(&self, ts_ms: u64) -> HeatBand {
        if !self.cfg.enabled {
            return HeatBand::Neutral;
        }
        let rate = self.accepts_per_hour(ts_ms);
        if rate < self.cfg.min_accepts_per_hr {
            HeatBand::Cold
        } else if rate > self.cfg.max_accepts_per_hr {
            HeatBand::Hot
        } else {
            HeatBand::Neutral
        }
    }

    /// Thresholds in effect at `ts_ms`, band deltas applied and clamped.
    pub fn effective_thresholds(&self, ts_ms: u64) -> EffectiveThresholds {
        let band = self.band(ts_ms);
        let (score_delta, buyers_delta) = match band {
            HeatBand::Cold => (
                -self.cfg.loosen_delta.score.abs(),
                -self.cfg.loosen_delta.buyers.abs(),
            ),
            HeatBand::Hot => (
                self.cfg.tighten_delta.score.abs(),
                self.cfg.tighten_delta.buyers.abs(),
            ),
            HeatBand::Neutral => (0, 0),
        };

        let score_floor = if band == HeatBand::Cold {
            self.cfg.floor.score.max(40)
        } else {
            self.cfg.floor.score
        };
        let min_score = (self.base_min_score + score_delta).clamp(score_floor, self.cfg.ceil.score);

        // Apex never drifts with heat; it is only clamped into the band.
        let apex_score = self
            .base_apex_score
            .clamp(self.cfg.floor.score, self.cfg.ceil.score);

        let buyers_floor = if band == HeatBand::Cold {
            self.cfg.floor.buyers.max(5)
        } else {
            self.cfg.floor.buyers
        };
        let min_buyers =
            (self.base_min_buyers + buyers_delta).clamp(buyers_floor, self.cfg.ceil.buyers);

        let unique_floor = if band == HeatBand::Cold {
            (buyers_floor - 1).max(4)
        } else {
            (self.cfg.floor.buyers - 1).max(0)
        };
        let unique_ceil = (self.cfg.ceil.buyers - 2).max(0);
        let min_unique =
            (self.base_min_unique + buyers_delta).clamp(unique_floor, unique_ceil);

        EffectiveThresholds {
            band,
            min_score,
            apex_score,
            min_buyers: min_buyers.max(0) as usize,
            min_unique: min_unique.max(0) as usize,
            accepts_per_hour: self.accepts_per_hour(ts_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeatConfig;

    fn controller(cfg: HeatConfig) -> HeatController {
        HeatController::new(cfg, 60, 80, 6, 5)
    }

    fn default_cfg() -> HeatConfig {
        HeatConfig::default()
    }

    #[test]
    fn distinct_mints_counted_once() {
        let mut heat = controller(default_cfg());
        let ts = 10 * MINUTE_MS;
        heat.record_accept("mintA", ts);
        heat.record_accept("mintA", ts + 1_000);
        heat.record_accept("mintB", ts + 2_000);
        // window_min = 60 -> rate equals distinct count.
        assert_eq!(heat.accepts_per_hour(ts + 3_000), 2.0);
        assert_eq!(heat.accepts_last_hour(ts + 3_000), 2);
    }

    #[test]
    fn stale_minutes_are_zeroed_on_wraparound() {
        let mut cfg = default_cfg();
        cfg.window_min = 60;
        let mut heat = controller(cfg);
        heat.record_accept("old", 5 * MINUTE_MS);
        // Same ring slot one full revolution later must not see "old".
        let later = (5 + 60) * MINUTE_MS;
        heat.record_accept("new", later);
        assert_eq!(heat.accepts_last_hour(later), 1);
    }

    #[test]
    fn band_transitions_are_strict() {
        let mut cfg = default_cfg();
        cfg.min_accepts_per_hr = 2.0;
        cfg.max_accepts_per_hr = 4.0;
        cfg.window_min = 60;
        let mut heat = controller(cfg);
        let ts = 100 * MINUTE_MS;

        assert_eq!(heat.band(ts), HeatBand::Cold);
        heat.record_accept("m1", ts);
        heat.record_accept("m2", ts);
        // rate == min threshold: not strictly below, so NEUTRAL.
        assert_eq!(heat.band(ts), HeatBand::Neutral);
        heat.record_accept("m3", ts);
        heat.record_accept("m4", ts);
        // rate == max threshold: not strictly above, still NEUTRAL.
        assert_eq!(heat.band(ts), HeatBand::Neutral);
        heat.record_accept("m5", ts);
        assert_eq!(heat.band(ts), HeatBand::Hot);
    }

    #[test]
    fn cold_loosens_with_floors() {
        let heat = controller(default_cfg());
        let eff = heat.effective_thresholds(500 * MINUTE_MS);
        assert_eq!(eff.band, HeatBand::Cold);
        // 60 - 5 = 55, floor max(40, 40) = 40.
        assert_eq!(eff.min_score, 55);
        // Apex never drifts.
        assert_eq!(eff.apex_score, 80);
        // 6 - 1 = 5, floor max(4, 5) = 5.
        assert_eq!(eff.min_buyers, 5);
        // 5 - 1 = 4, floor max(4, 5-1) = 4, ceil 10-2 = 8.
        assert_eq!(eff.min_unique, 4);
    }

    #[test]
    fn hot_tightens_with_ceilings() {
        let mut heat = controller(default_cfg());
        let ts = 200 * MINUTE_MS;
        for i in 0..13 {
            heat.record_accept(&format!("m{i}"), ts);
        }
        let eff = heat.effective_thresholds(ts);
        assert_eq!(eff.band, HeatBand::Hot);
        // 60 + 10 = 70 within [40, 90].
        assert_eq!(eff.min_score, 70);
        assert_eq!(eff.apex_score, 80);
        // 6 + 2 = 8 within [4, 10].
        assert_eq!(eff.min_buyers, 8);
        // 5 + 2 = 7 within [3, 8].
        assert_eq!(eff.min_unique, 7);
    }

    #[test]
    fn disabled_heat_is_always_neutral() {
        let mut cfg = default_cfg();
        cfg.enabled = false;
        let heat = controller(cfg);
        let eff = heat.effective_thresholds(0);
        assert_eq!(eff.band, HeatBand::Neutral);
        assert_eq!(eff.min_score, 60);
        assert_eq!(eff.min_buyers, 6);
    }

    #[test]
    fn short_window_scales_rate() {
        let mut cfg = default_cfg();
        cfg.window_min = 15;
        let mut heat = controller(cfg);
        let ts = 300 * MINUTE_MS;
        heat.record_accept("m1", ts);
        // 1 distinct over 15 min -> 4/hr.
        assert_eq!(heat.accepts_per_hour(ts), 4.0);
        // Outside the 15-minute window the accept no longer counts.
        assert_eq!(heat.accepts_per_hour(ts + 16 * MINUTE_MS), 0.0);
    }
}
