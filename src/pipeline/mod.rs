//! The decision pipeline: one owner struct over all per-batch mutable
//! state, driven by the single ingestion task inside the launch watcher.
//!
//! Per-batch order is fixed: parse, signature dedup, optional transaction
//! introspection, mint verification, microstructure ingest, cohort hit,
//! entry evaluation, persistence, counters. Per-mint state is only ever
//! mutated here, which is what makes the ordering guarantees hold.

pub mod conviction;
pub mod counters;
pub mod entry;
pub mod heat;
pub mod introspect;
pub mod microstructure;
pub mod parser;
pub mod safety;
pub mod validator;

use crate::config::{Config, MintVerifyMode};
use crate::storage::{EventRow, LedgerStore, TokenUpsert};
use crate::types::{LogBatch, Origin};
use anyhow::Result;
use counters::FeedCounters;
use entry::EntryEngine;
use heat::HeatController;
use introspect::TxIntrospector;
use microstructure::{ActiveMint, MicrostructureTracker, DEFAULT_TTL_MS};
use parser::LogParser;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use validator::MintValidator;

/// Dedup window for repeated signatures.
const DEDUP_TTL_MS: u64 = 60_000;

/// Periodically published view of the tracker, read by the status endpoint
/// and the quote sampler.
#[derive(Clone, Default)]
pub struct MicroSummary {
    pub tracked_mints: usize,
    pub evicted_total: u64,
    pub heat_band: String,
    pub accepts_per_hour: f64,
    pub active: Vec<ActiveMint>,
}

pub struct Pipeline {
    cfg: Arc<Config>,
    validator: MintValidator,
    micro: MicrostructureTracker,
    heat: HeatController,
    entry: EntryEngine,
    introspector: Option<TxIntrospector>,
    store: Arc<dyn LedgerStore>,
    counters: FeedCounters,
    cohort_wallets: HashSet<String>,
    cohort_hits: HashMap<String, u64>,
    seen_signatures: HashMap<String, u64>,
    summary: Arc<RwLock<MicroSummary>>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        validator: MintValidator,
        entry: EntryEngine,
        introspector: Option<TxIntrospector>,
        store: Arc<dyn LedgerStore>,
        counters: FeedCounters,
    ) -> Self {
        let heat = HeatController::new(
            cfg.heat.clone(),
            cfg.entry.min_score,
            cfg.entry.apex_score,
            cfg.entry.min_obs_buyers,
            cfg.entry.min_obs_unique,
        );
        let cohort_wallets = cfg.cohort.wallets.iter().cloned().collect();
        Self {
            cfg,
            validator,
            micro: MicrostructureTracker::new(),
            heat,
            entry,
            introspector,
            store,
            counters,
            cohort_wallets,
            cohort_hits: HashMap::new(),
            seen_signatures: HashMap::new(),
            summary: Arc::new(RwLock::new(MicroSummary::default())),
        }
    }

    /// Shared summary handle for readers outside the ingestion task.
    pub fn summary_handle(&self) -> Arc<RwLock<MicroSummary>> {
        self.summary.clone()
    }

    /// Process one log batch end to end. Per-event failures are contained:
    /// this returns `Err` only on storage faults worth surfacing, and the
    /// watcher logs rather than exits on those.
    pub async fn process_batch(&mut self, batch: &LogBatch) -> Result<()> {
        let now = batch.ts;
        self.counters.record_event(batch.origin, now).await;

        let parsed = LogParser::parse(batch.origin, &batch.logs, &self.validator);

        // Per-signature dedup.
        if !batch.signature.is_empty() {
            if let Some(prev) = self.seen_signatures.get(&batch.signature) {
                if now.saturating_sub(*prev) <= DEDUP_TTL_MS {
                    self.counters.bump_dup().await;
                    return Ok(());
                }
            }
            self.seen_signatures.insert(batch.signature.clone(), now);
        }

        // Targeted introspection for pumpfun batches the parser missed.
        let mut mint = parsed.mint.clone();
        let mut buyer = parsed.buyer.clone();
        if mint.is_none() && batch.origin == Origin::Pumpfun && !batch.signature.is_empty() {
            if let Some(introspector) = &self.introspector {
                let found = introspector.lookup(&batch.signature, batch.origin).await;
                if let Some(m) = found.mint {
                    debug!(mint = %m, signature = %batch.signature, "mint recovered by introspection");
                    mint = Some(m);
                    if buyer.is_none() {
                        buyer = found.buyer;
                    }
                }
            }
        }
        let Some(mint) = mint else {
            self.counters.bump_parse_miss().await;
            return Ok(());
        };

        // On-chain verification per configured mode.
        match self.cfg.mint_verify.mode {
            MintVerifyMode::Eager => {
                if !self.validator.is_real_mint(&mint).await {
                    self.counters.bump_invalid_mint().await;
                    return Ok(());
                }
            }
            MintVerifyMode::Deferred => {
                // Spend the fetch only once the mint is interesting enough
                // to possibly pass the observation gate.
                let pre = self.micro.snapshot(&mint);
                let eff = self.heat.effective_thresholds(now);
                if pre.buyers >= eff.min_buyers
                    && pre.unique_funders >= eff.min_unique
                    && pre.same_funder_ratio <= 0.70
                    && !self.validator.is_real_mint(&mint).await
                {
                    self.counters.bump_invalid_mint().await;
                    return Ok(());
                }
            }
            MintVerifyMode::Off => {}
        }

        // Microstructure ingest.
        let raw = batch.logs.join("\n");
        let Some(tracked) = self
            .micro
            .track(&mint, batch.origin, now, &raw, &self.validator)
        else {
            self.counters.bump_micro_drop().await;
            return Ok(());
        };

        // Smart-money cohort hit.
        if let Some(b) = &buyer {
            if self.cohort_wallets.contains(b) {
                debug!(mint = %mint, buyer = %b, "cohort hit");
                self.cohort_hits.insert(mint.clone(), now);
            }
        }

        // Entry evaluation; a failure here never kills ingestion.
        let cohort_ts = self.cohort_hits.get(&mint).copied();
        if let Err(e) = self
            .entry
            .evaluate(
                &mint,
                batch.origin,
                now,
                parsed.creator.as_deref(),
                &tracked.snapshot,
                &mut self.heat,
                cohort_ts,
            )
            .await
        {
            warn!(mint = %mint, error = %e, "entry evaluation failed");
        }

        // Persistence: token upsert always, event row on material change.
        let token = TokenUpsert {
            mint: mint.clone(),
            origin: batch.origin,
            creator: parsed.creator.clone(),
            name: None,
            symbol: None,
            ts: now,
        };
        if let Err(e) = self.store.upsert_token(&token).await {
            warn!(mint = %mint, error = %e, "token upsert failed");
        }
        if tracked.changed {
            let event = EventRow {
                ts: now,
                signature: (!batch.signature.is_empty()).then(|| batch.signature.clone()),
                mint: mint.clone(),
                origin: batch.origin,
                creator: parsed.creator.clone(),
                snapshot: tracked.snapshot,
            };
            if let Err(e) = self.store.insert_event(&event).await {
                warn!(mint = %mint, error = %e, "event insert failed");
            }
        }

        Ok(())
    }

    /// Periodic maintenance: state expiry, dedup and cohort pruning, the
    /// 24-h counter roll, and the published summary refresh.
    pub async fn housekeeping(&mut self, now_ms: u64) {
        self.micro.expire(now_ms, DEFAULT_TTL_MS);
        self.seen_signatures
            .retain(|_, ts| now_ms.saturating_sub(*ts) <= DEDUP_TTL_MS);
        let decay_ms = self.cfg.cohort.decay_sec * 1000;
        self.cohort_hits
            .retain(|_, ts| now_ms.saturating_sub(*ts) <= decay_ms);
        self.counters.maybe_roll_day(now_ms).await;

        let eff = self.heat.effective_thresholds(now_ms);
        let mut summary = self.summary.write().await;
        summary.tracked_mints = self.micro.tracked_mints();
        summary.evicted_total = self.micro.evicted_total();
        summary.heat_band = eff.band.as_str().to_string();
        summary.accepts_per_hour = eff.accepts_per_hour;
        summary.active = self.micro.active_mints();
    }

    pub fn entry_engine(&self) -> &EntryEngine {
        &self.entry
    }

    /// Deterministic microstructure read, zeros for an unknown mint.
    pub fn micro_snapshot(&self, mint: &str) -> crate::types::Snapshot {
        self.micro.snapshot(mint)
    }
}
