//! Core types shared across the mintwatch pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Launchpad families we subscribe to, in fixed priority order.
///
/// When the same program id is configured under more than one origin, the
/// first origin in this order wins the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Pumpfun,
    Letsbonk,
    Moonshot,
    Raydium,
    Orca,
}

impl Origin {
    /// All origins in priority order.
    pub const ALL: [Origin; 5] = [
        Origin::Pumpfun,
        Origin::Letsbonk,
        Origin::Moonshot,
        Origin::Raydium,
        Origin::Orca,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Pumpfun => "pumpfun",
            Origin::Letsbonk => "letsbonk",
            Origin::Moonshot => "moonshot",
            Origin::Raydium => "raydium",
            Origin::Orca => "orca",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One batch of program logs delivered by a log subscription.
#[derive(Debug, Clone)]
pub struct LogBatch {
    pub origin: Origin,
    pub program_id: String,
    pub signature: String,
    pub logs: Vec<String>,
    /// Wall-clock receive time in milliseconds.
    pub ts: u64,
}

/// Classified kind of a log batch, detected by substring presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Buy,
    AddLiquidity,
    Unknown,
}

/// Result of scanning one log batch for identifiers.
///
/// At most one identifier per category, picked by the per-origin key
/// priority lists. `miss` carries the reason when no mint was found.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub mint: Option<String>,
    pub buyer: Option<String>,
    pub creator: Option<String>,
    pub kind: Option<EventKind>,
    pub miss: Option<&'static str>,
}

/// Derived microstructure snapshot for one mint at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub buyers: usize,
    pub unique_funders: usize,
    pub same_funder_ratio: f64,
    pub price_jumps: u32,
    pub depth_est: f64,
    pub last_ts: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            buyers: 0,
            unique_funders: 0,
            same_funder_ratio: 0.0,
            price_jumps: 0,
            depth_est: 0.0,
            last_ts: 0,
        }
    }
}

/// Market-temperature band derived from the rolling accept rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeatBand {
    Cold,
    Neutral,
    Hot,
}

impl HeatBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeatBand::Cold => "COLD",
            HeatBand::Neutral => "NEUTRAL",
            HeatBand::Hot => "HOT",
        }
    }
}

/// Heat-adjusted acceptance thresholds in effect at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectiveThresholds {
    pub band: HeatBand,
    pub min_score: i32,
    pub apex_score: i32,
    pub min_buyers: usize,
    pub min_unique: usize,
    pub accepts_per_hour: f64,
}

/// Conviction tier assigned by the entry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tier {
    Apex,
    Small,
    Reject,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Apex => "APEX",
            Tier::Small => "SMALL",
            Tier::Reject => "REJECT",
        }
    }
}

/// Per-mint decision label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Hold,
    RejectedSoft,
    RejectedFatal,
    AcceptedSmall,
    AcceptedApex,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Hold => "hold",
            Decision::RejectedSoft => "rejected_soft",
            Decision::RejectedFatal => "rejected_fatal",
            Decision::AcceptedSmall => "accepted_small",
            Decision::AcceptedApex => "accepted_apex",
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::AcceptedSmall | Decision::AcceptedApex)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_priority_order_is_fixed() {
        assert_eq!(Origin::ALL[0], Origin::Pumpfun);
        assert_eq!(Origin::ALL[4], Origin::Orca);
        assert_eq!(Origin::Pumpfun.as_str(), "pumpfun");
    }

    #[test]
    fn decision_accept_set() {
        assert!(Decision::AcceptedSmall.is_accept());
        assert!(Decision::AcceptedApex.is_accept());
        assert!(!Decision::Hold.is_accept());
        assert!(!Decision::RejectedFatal.is_accept());
    }
}
