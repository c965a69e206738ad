//! Per-mint entry decision state machine.
//!
//! Each evaluation runs the full ladder: sticky-fatal absorb, re-eval
//! cooldown, hold TTL, observation gate, fatal and soft safety gates,
//! conviction scoring, tier assignment, and the single-accept guard with
//! SMALL to APEX as the only allowed in-place upgrade.

use crate::alerts::{DecisionAlert, Notifier};
use crate::config::{CohortConfig, EntryConfig, SizeTiers};
use crate::pipeline::conviction::{self, Boosts};
use crate::pipeline::counters::FeedCounters;
use crate::pipeline::heat::HeatController;
use crate::pipeline::safety;
use crate::storage::{EntryOrderRow, LedgerStore};
use crate::types::{Decision, Origin, Snapshot, Tier};
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Same-funder concentration beyond which a mint is fatally rejected.
const SAME_FUNDER_FATAL: f64 = 0.75;

/// One logged decision transition, kept for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionLogEntry {
    pub ts: u64,
    pub mint: String,
    pub origin: String,
    pub decision: String,
    pub score: i32,
    pub tier: Option<String>,
    pub reason: Option<String>,
}

/// Shared ring of the most recent decisions and accepts.
#[derive(Clone, Default)]
pub struct DecisionLog {
    inner: Arc<RwLock<DecisionLogInner>>,
}

#[derive(Default)]
struct DecisionLogInner {
    decisions: VecDeque<DecisionLogEntry>,
    accepted: VecDeque<DecisionLogEntry>,
}

const LOG_KEEP: usize = 10;

impl DecisionLog {
    pub async fn push(&self, entry: DecisionLogEntry) {
        let mut inner = self.inner.write().await;
        let is_accept = entry.decision.starts_with("accepted");
        inner.decisions.push_back(entry.clone());
        if inner.decisions.len() > LOG_KEEP {
            inner.decisions.pop_front();
        }
        if is_accept {
            inner.accepted.push_back(entry);
            if inner.accepted.len() > LOG_KEEP {
                inner.accepted.pop_front();
            }
        }
    }

    pub async fn recent(&self) -> (Vec<DecisionLogEntry>, Vec<DecisionLogEntry>) {
        let inner = self.inner.read().await;
        (
            inner.decisions.iter().cloned().collect(),
            inner.accepted.iter().cloned().collect(),
        )
    }
}

/// Per-creator launch history used for the deployer conviction boost.
#[derive(Default)]
struct DeployerBook {
    launches: HashMap<String, (u32, u32)>, // (good, total)
}

impl DeployerBook {
    const MIN_SAMPLE: u32 = 3;

    fn record_accept(&mut self, creator: Option<&str>) {
        if let Some(c) = creator {
            let e = self.launches.entry(c.to_string()).or_insert((0, 0));
            e.0 += 1;
            e.1 += 1;
        }
    }

    fn record_fatal(&mut self, creator: Option<&str>) {
        if let Some(c) = creator {
            let e = self.launches.entry(c.to_string()).or_insert((0, 0));
            e.1 += 1;
        }
    }

    fn good_rate(&self, creator: Option<&str>) -> Option<f64> {
        let (good, total) = creator.and_then(|c| self.launches.get(c))?;
        if *total >= Self::MIN_SAMPLE {
            Some(*good as f64 / *total as f64)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct MintState {
    origin: Origin,
    first_seen_ts: u64,
    last_eval_ts: u64,
    reeval_count: u32,
    best_score: i32,
    last_decision: Option<Decision>,
    last_accepted_ts: Option<u64>,
    sticky_fatal: bool,
    ttl_expired: bool,
    creator: Option<String>,
}

impl MintState {
    fn new(origin: Origin, now_ms: u64) -> Self {
        Self {
            origin,
            first_seen_ts: now_ms,
            last_eval_ts: 0,
            reeval_count: 0,
            best_score: 0,
            last_decision: None,
            last_accepted_ts: None,
            sticky_fatal: false,
            ttl_expired: false,
            creator: None,
        }
    }
}

pub struct EntryEngine {
    cfg: EntryConfig,
    sizes: SizeTiers,
    cohort: CohortConfig,
    dry_run: bool,
    store: Arc<dyn LedgerStore>,
    notifier: Arc<Notifier>,
    counters: FeedCounters,
    log: DecisionLog,
    states: HashMap<String, MintState>,
    deployers: DeployerBook,
}

impl EntryEngine {
    pub fn new(
        cfg: EntryConfig,
        sizes: SizeTiers,
        cohort: CohortConfig,
        dry_run: bool,
        store: Arc<dyn LedgerStore>,
        notifier: Arc<Notifier>,
        counters: FeedCounters,
        log: DecisionLog,
    ) -> Self {
        Self {
            cfg,
            sizes,
            cohort,
            dry_run,
            store,
            notifier,
            counters,
            log,
            states: HashMap::new(),
            deployers: DeployerBook::default(),
        }
    }

    /// Evaluate one mint against its current snapshot and the effective
    /// thresholds. All state transitions for the mint happen here.
    pub async fn evaluate(
        &mut self,
        mint: &str,
        origin: Origin,
        now_ms: u64,
        creator: Option<&str>,
        snapshot: &Snapshot,
        heat: &mut HeatController,
        cohort_hit_ts: Option<u64>,
    ) -> Result<()> {
        let state = self
            .states
            .entry(mint.to_string())
            .or_insert_with(|| MintState::new(origin, now_ms));
        if let Some(c) = creator {
            state.creator.get_or_insert_with(|| c.to_string());
        }
        if state.sticky_fatal {
            return Ok(());
        }

        // Re-evaluation cooldown.
        if state.last_eval_ts > 0
            && now_ms.saturating_sub(state.last_eval_ts) < self.cfg.reeval_cooldown_sec * 1000
        {
            return Ok(());
        }
        state.last_eval_ts = now_ms;
        state.reeval_count += 1;

        // Hold TTL / max re-evals.
        if state.last_decision == Some(Decision::Hold) {
            let ttl_hit = self.cfg.hold_ttl_sec > 0
                && now_ms.saturating_sub(state.first_seen_ts) > self.cfg.hold_ttl_sec * 1000;
            let reeval_hit =
                self.cfg.hold_max_reevals > 0 && state.reeval_count >= self.cfg.hold_max_reevals;
            if ttl_hit || reeval_hit {
                state.last_decision = Some(Decision::RejectedSoft);
                state.ttl_expired = true;
                self.counters.bump_soft_reject(now_ms).await;
                debug!(mint, "hold expired, soft reject");
                self.log
                    .push(DecisionLogEntry {
                        ts: now_ms,
                        mint: mint.to_string(),
                        origin: origin.as_str().to_string(),
                        decision: Decision::RejectedSoft.as_str().to_string(),
                        score: state.best_score,
                        tier: None,
                        reason: Some("hold-expired".to_string()),
                    })
                    .await;
                return Ok(());
            }
        }

        let eff = heat.effective_thresholds(now_ms);

        // Observation gate: not enough flow yet to judge.
        if snapshot.buyers < eff.min_buyers || snapshot.unique_funders < eff.min_unique {
            if state.last_decision != Some(Decision::Hold) {
                self.counters.bump_pending(now_ms).await;
            }
            state.last_decision = Some(Decision::Hold);
            return Ok(());
        }

        // Fatal gate: absorbing.
        if snapshot.same_funder_ratio > SAME_FUNDER_FATAL {
            state.last_decision = Some(Decision::RejectedFatal);
            state.sticky_fatal = true;
            let creator_owned = state.creator.clone();
            self.deployers.record_fatal(creator_owned.as_deref());
            let reason = format!(
                "sameFunderRatio={:.2}>{SAME_FUNDER_FATAL}",
                snapshot.same_funder_ratio
            );
            let row = EntryOrderRow {
                market: mint.to_string(),
                mint: mint.to_string(),
                origin,
                status: "rejected_fatal".to_string(),
                size_tier: None,
                quantity_base: 0.0,
                decided_ts: now_ms,
                notes: Some(reason.clone()),
            };
            if let Err(e) = self.store.upsert_unitary_entry(&row).await {
                warn!(mint, error = %e, "failed to persist fatal rejection");
            }
            self.counters.bump_fatal_reject(now_ms).await;
            self.notifier
                .decision(&DecisionAlert {
                    mint: mint.to_string(),
                    origin,
                    decision: Decision::RejectedFatal,
                    score: state.best_score,
                    tier: None,
                    reason: Some(reason.clone()),
                })
                .await;
            self.log
                .push(DecisionLogEntry {
                    ts: now_ms,
                    mint: mint.to_string(),
                    origin: origin.as_str().to_string(),
                    decision: Decision::RejectedFatal.as_str().to_string(),
                    score: state.best_score,
                    tier: None,
                    reason: Some(reason),
                })
                .await;
            info!(mint, "fatal reject, evaluation suppressed from now on");
            return Ok(());
        }

        // Soft gate: retry after cooldown, nothing persisted.
        let verdict = safety::evaluate(snapshot);
        if let Some(reason) = verdict.reason() {
            if state.last_decision != Some(Decision::RejectedSoft) {
                self.counters.bump_soft_reject(now_ms).await;
            }
            state.last_decision = Some(Decision::RejectedSoft);
            debug!(mint, reason, "soft reject");
            return Ok(());
        }

        // Conviction.
        let boosts = Boosts {
            cohort_hit_ts,
            cohort_boost: self.cohort.boost,
            cohort_decay_sec: self.cohort.decay_sec,
            deployer_good_rate: self.deployers.good_rate(state.creator.as_deref()),
        };
        let conviction = conviction::score(snapshot, now_ms, &boosts);
        state.best_score = state.best_score.max(conviction.score);

        let tier = if conviction.score >= eff.apex_score {
            Tier::Apex
        } else if conviction.score >= eff.min_score {
            Tier::Small
        } else {
            Tier::Reject
        };
        if tier == Tier::Reject {
            if state.last_decision != Some(Decision::Hold) {
                self.counters.bump_pending(now_ms).await;
            }
            state.last_decision = Some(Decision::Hold);
            return Ok(());
        }

        // Accept-upgrade cooldown: an APEX signal shortly after the SMALL
        // accept does not upgrade yet.
        if tier == Tier::Apex
            && state.last_decision == Some(Decision::AcceptedSmall)
            && state
                .last_accepted_ts
                .map(|t| now_ms.saturating_sub(t) < self.cfg.accept_cooldown_sec * 1000)
                .unwrap_or(false)
        {
            return Ok(());
        }

        // Single-accept guard: only SMALL -> APEX may pass.
        let prior = state.last_decision;
        let upgrade = prior == Some(Decision::AcceptedSmall) && tier == Tier::Apex;
        if matches!(
            prior,
            Some(Decision::AcceptedSmall) | Some(Decision::AcceptedApex)
        ) && !upgrade
        {
            return Ok(());
        }

        let decision = match tier {
            Tier::Apex => Decision::AcceptedApex,
            Tier::Small => Decision::AcceptedSmall,
            Tier::Reject => unreachable!(),
        };

        if upgrade {
            self.store
                .upgrade_unitary_tier(mint, Tier::Apex.as_str(), now_ms)
                .await?;
        } else {
            let status = if self.dry_run { "dry_run" } else { "accepted" };
            let quantity = match tier {
                Tier::Apex => self.sizes.apex_sol,
                _ => self.sizes.small_sol,
            };
            let notes = serde_json::to_string(&conviction.parts).ok();
            self.store
                .upsert_unitary_entry(&EntryOrderRow {
                    market: mint.to_string(),
                    mint: mint.to_string(),
                    origin,
                    status: status.to_string(),
                    size_tier: Some(tier.as_str().to_string()),
                    quantity_base: quantity,
                    decided_ts: now_ms,
                    notes,
                })
                .await?;
        }

        state.last_decision = Some(decision);
        state.last_accepted_ts = Some(now_ms);

        if !upgrade {
            // Heat ticks exactly once, on the first accept.
            heat.record_accept(mint, now_ms);
            self.counters.bump_accept(now_ms).await;
            let creator_owned = state.creator.clone();
            self.deployers.record_accept(creator_owned.as_deref());
        }

        self.notifier
            .decision(&DecisionAlert {
                mint: mint.to_string(),
                origin,
                decision,
                score: conviction.score,
                tier: Some(tier.as_str()),
                reason: None,
            })
            .await;
        self.log
            .push(DecisionLogEntry {
                ts: now_ms,
                mint: mint.to_string(),
                origin: origin.as_str().to_string(),
                decision: decision.as_str().to_string(),
                score: conviction.score,
                tier: Some(tier.as_str().to_string()),
                reason: None,
            })
            .await;
        info!(mint, %decision, score = conviction.score, band = eff.band.as_str(), "entry decision");
        Ok(())
    }

    /// Whether the mint is in the absorbing fatal state.
    pub fn is_sticky_fatal(&self, mint: &str) -> bool {
        self.states
            .get(mint)
            .map(|s| s.sticky_fatal)
            .unwrap_or(false)
    }

    pub fn last_decision(&self, mint: &str) -> Option<Decision> {
        self.states.get(mint).and_then(|s| s.last_decision)
    }

    pub fn best_score(&self, mint: &str) -> Option<i32> {
        self.states.get(mint).map(|s| s.best_score)
    }

    pub fn tracked_states(&self) -> usize {
        self.states.len()
    }
}
