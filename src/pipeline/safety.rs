//! Hard safety gate over a microstructure snapshot.

use crate::types::Snapshot;

/// Outcome of the safety gate: either the first violated rule, or the
/// names of the satisfied rules when all pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    Pass { satisfied: [&'static str; 3] },
    Fail { reason: &'static str },
}

impl SafetyVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, SafetyVerdict::Pass { .. })
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            SafetyVerdict::Fail { reason } => Some(reason),
            SafetyVerdict::Pass { .. } => None,
        }
    }
}

/// Minimum observed buyers before any entry is considered safe.
pub const MIN_BUYERS: usize = 4;

/// Soft same-funder concentration limit.
pub const SAME_FUNDER_LIMIT: f64 = 0.70;

/// Minimum depth estimate.
pub const MIN_DEPTH: f64 = 0.15;

/// Pure predicate; no side effects, no clock.
pub fn evaluate(snapshot: &Snapshot) -> SafetyVerdict {
    if snapshot.buyers < MIN_BUYERS {
        return SafetyVerdict::Fail { reason: "buyers<4" };
    }
    if snapshot.same_funder_ratio > SAME_FUNDER_LIMIT {
        return SafetyVerdict::Fail {
            reason: "sameFunderRatio>0.70",
        };
    }
    if snapshot.depth_est < MIN_DEPTH {
        return SafetyVerdict::Fail {
            reason: "depthEst<0.15",
        };
    }
    SafetyVerdict::Pass {
        satisfied: ["buyers>=4", "sameFunderRatio<=0.70", "depthEst>=0.15"],
    }
}
