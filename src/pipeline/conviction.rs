//! Conviction scoring.
//!
//! Pure integer score in `[0, 100]`, summed from independent buckets over a
//! snapshot plus two optional boosts: a smart-money cohort hit within its
//! decay window, and the deployer's historical good-rate bucket.

use crate::types::Snapshot;

/// Breakdown entry: bucket name and its contribution.
pub type ScorePart = (&'static str, i32);

#[derive(Debug, Clone)]
pub struct ConvictionScore {
    pub score: i32,
    pub parts: Vec<ScorePart>,
}

/// Inputs beyond the snapshot itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Boosts {
    /// Last smart-money hit for this mint, if any.
    pub cohort_hit_ts: Option<u64>,
    /// Configured cohort boost amount.
    pub cohort_boost: i32,
    /// Cohort decay window in seconds.
    pub cohort_decay_sec: u64,
    /// Deployer historical good rate, when enough history exists.
    pub deployer_good_rate: Option<f64>,
}

/// Score a snapshot. Tiers within a bucket are non-cumulative: the highest
/// matching tier wins.
pub fn score(snapshot: &Snapshot, now_ms: u64, boosts: &Boosts) -> ConvictionScore {
    let mut parts: Vec<ScorePart> = Vec::new();

    let buyers_pts = if snapshot.buyers >= 8 {
        30
    } else if snapshot.buyers >= 6 {
        20
    } else {
        0
    };
    if buyers_pts > 0 {
        parts.push(("buyers", buyers_pts));
    }

    let funders_pts = if snapshot.unique_funders >= 6 {
        20
    } else if snapshot.unique_funders >= 5 {
        15
    } else {
        0
    };
    if funders_pts > 0 {
        parts.push(("funders", funders_pts));
    }

    let jumps_pts = if snapshot.price_jumps >= 2 {
        20
    } else if snapshot.price_jumps >= 1 {
        10
    } else {
        0
    };
    if jumps_pts > 0 {
        parts.push(("jumps", jumps_pts));
    }

    let depth_pts = if snapshot.depth_est >= 0.35 {
        20
    } else if snapshot.depth_est >= 0.30 {
        10
    } else {
        0
    };
    if depth_pts > 0 {
        parts.push(("depth", depth_pts));
    }

    if snapshot.same_funder_ratio > 0.60 {
        parts.push(("sameFunder", -20));
    }

    if let Some(hit_ts) = boosts.cohort_hit_ts {
        if now_ms.saturating_sub(hit_ts) <= boosts.cohort_decay_sec * 1000 {
            parts.push(("cohortBoost", boosts.cohort_boost));
        }
    }

    if let Some(rate) = boosts.deployer_good_rate {
        let pts = if rate >= 0.8 {
            15
        } else if rate >= 0.6 {
            10
        } else if rate >= 0.4 {
            5
        } else {
            0
        };
        if pts > 0 {
            parts.push(("deployerBoost", pts));
        }
    }

    let raw: i32 = parts.iter().map(|(_, p)| p).sum();
    ConvictionScore {
        score: raw.clamp(0, 100),
        parts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(buyers: usize, unique: usize, ratio: f64, jumps: u32, depth: f64) -> Snapshot {
        Snapshot {
            buyers,
            unique_funders: unique,
            same_funder_ratio: ratio,
            price_jumps: jumps,
            depth_est: depth,
            last_ts: 0,
        }
    }

    #[test]
    fn happy_path_scores_eighty() {
        // 30 (buyers>=8) + 20 (unique>=6) + 10 (one jump) + 20 (depth>=0.35).
        let s = snapshot(8, 6, 0.3, 1, 0.4);
        let c = score(&s, 0, &Boosts::default());
        assert_eq!(c.score, 80);
    }

    #[test]
    fn bucket_tiers_are_non_cumulative() {
        let low = snapshot(6, 5, 0.0, 1, 0.30);
        let c = score(&low, 0, &Boosts::default());
        // 20 + 15 + 10 + 10
        assert_eq!(c.score, 55);

        let high = snapshot(8, 6, 0.0, 2, 0.35);
        let c = score(&high, 0, &Boosts::default());
        // 30 + 20 + 20 + 20
        assert_eq!(c.score, 90);
    }

    #[test]
    fn same_funder_penalty_applies_above_sixty_percent() {
        let s = snapshot(8, 6, 0.61, 2, 0.4);
        let c = score(&s, 0, &Boosts::default());
        assert_eq!(c.score, 90 - 20);
        assert!(c.parts.contains(&("sameFunder", -20)));
    }

    #[test]
    fn score_is_clamped_to_unit_interval() {
        let s = snapshot(2, 1, 0.9, 0, 0.0);
        let c = score(&s, 0, &Boosts::default());
        assert_eq!(c.score, 0);

        let s = snapshot(20, 10, 0.0, 5, 1.0);
        let boosts = Boosts {
            cohort_hit_ts: Some(0),
            cohort_boost: 25,
            cohort_decay_sec: 60,
            deployer_good_rate: Some(0.9),
        };
        let c = score(&s, 1_000, &boosts);
        assert_eq!(c.score, 100);
    }

    #[test]
    fn cohort_boost_respects_decay_window() {
        let s = snapshot(8, 6, 0.3, 1, 0.4);
        let boosts = Boosts {
            cohort_hit_ts: Some(10_000),
            cohort_boost: 10,
            cohort_decay_sec: 60,
            deployer_good_rate: None,
        };
        let inside = score(&s, 10_000 + 60_000, &boosts);
        assert_eq!(inside.score, 90);
        let outside = score(&s, 10_000 + 60_001, &boosts);
        assert_eq!(outside.score, 80);
    }

    #[test]
    fn deployer_boost_buckets() {
        let s = snapshot(8, 6, 0.3, 0, 0.2);
        let base = score(&s, 0, &Boosts::default()).score;
        for (rate, bonus) in [(0.85, 15), (0.6, 10), (0.45, 5), (0.2, 0)] {
            let boosts = Boosts {
                deployer_good_rate: Some(rate),
                ..Boosts::default()
            };
            assert_eq!(score(&s, 0, &boosts).score, base + bonus, "rate {rate}");
        }
    }
}
