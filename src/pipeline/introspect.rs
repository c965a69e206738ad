//! Rate-limited transaction introspection.
//!
//! Used when a pumpfun batch carries no parseable mint: fetch the
//! transaction, diff pre/post token balances, and pick the mint with the
//! largest fresh positive delta. A FIFO queue is drained on a qps-derived
//! tick, bounded by a global token bucket and a rolling-minute cap;
//! concurrent lookups for the same signature coalesce onto one fetch.

use crate::config::{TxLookupConfig, TxLookupMode};
use crate::pipeline::counters::FeedCounters;
use crate::pipeline::validator::MintValidator;
use crate::types::{now_ms, Origin};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{UiTransactionEncoding, UiTransactionTokenBalance};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Signature verdict cache TTL.
const SIG_CACHE_TTL_SEC: u64 = 1_800;

/// Token-account owner cache TTL.
const OWNER_CACHE_TTL_SEC: u64 = 3_600;

const ROLLING_WINDOW_MS: u64 = 60_000;

/// Result of one introspection.
#[derive(Debug, Clone, Default)]
pub struct IntrospectResult {
    pub mint: Option<String>,
    pub buyer: Option<String>,
    pub reason: Option<&'static str>,
}

impl IntrospectResult {
    pub fn empty() -> Self {
        Self::default()
    }

    fn miss(reason: &'static str) -> Self {
        Self {
            mint: None,
            buyer: None,
            reason: Some(reason),
        }
    }
}

struct Job {
    signature: String,
    origin: Origin,
    reply: oneshot::Sender<IntrospectResult>,
}

/// Cheap cloneable handle; the worker does the actual fetching.
#[derive(Clone)]
pub struct TxIntrospector {
    mode: TxLookupMode,
    work_tx: mpsc::Sender<Job>,
}

impl TxIntrospector {
    pub fn new(
        cfg: TxLookupConfig,
        rpc: Arc<RpcClient>,
        validator: MintValidator,
        counters: FeedCounters,
    ) -> (Self, IntrospectorWorker) {
        let (work_tx, work_rx) = mpsc::channel(256);
        let quota = Quota::per_second(NonZeroU32::new(cfg.qps.max(1)).unwrap_or(NonZeroU32::MIN));
        let worker = IntrospectorWorker {
            cfg: cfg.clone(),
            rpc,
            validator,
            counters,
            work_rx,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            window: VecDeque::new(),
            limiter: Arc::new(RateLimiter::direct(quota)),
            sig_cache: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(Duration::from_secs(SIG_CACHE_TTL_SEC))
                .build(),
            owner_cache: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(Duration::from_secs(OWNER_CACHE_TTL_SEC))
                .build(),
        };
        (
            Self {
                mode: cfg.mode,
                work_tx,
            },
            worker,
        )
    }

    /// Introspect a signature. Resolves immediately with an empty result
    /// when the mode excludes this origin.
    pub async fn lookup(&self, signature: &str, origin: Origin) -> IntrospectResult {
        match self.mode {
            TxLookupMode::Off => return IntrospectResult::empty(),
            TxLookupMode::PumpfunOnly if origin != Origin::Pumpfun => {
                return IntrospectResult::empty()
            }
            _ => {}
        }
        let (reply, rx) = oneshot::channel();
        let job = Job {
            signature: signature.to_string(),
            origin,
            reply,
        };
        if self.work_tx.send(job).await.is_err() {
            return IntrospectResult::miss("shutting-down");
        }
        rx.await
            .unwrap_or_else(|_| IntrospectResult::miss("shutting-down"))
    }
}

pub struct IntrospectorWorker {
    cfg: TxLookupConfig,
    rpc: Arc<RpcClient>,
    validator: MintValidator,
    counters: FeedCounters,
    work_rx: mpsc::Receiver<Job>,
    queue: VecDeque<String>,
    pending: HashMap<String, (Origin, Vec<oneshot::Sender<IntrospectResult>>)>,
    window: VecDeque<u64>,
    limiter: Arc<DefaultDirectRateLimiter>,
    sig_cache: Cache<String, IntrospectResult>,
    owner_cache: Cache<String, String>,
}

impl IntrospectorWorker {
    /// Worker loop: jobs in, fetches out, one queue pop per tick. Exits
    /// when the last handle is dropped, resolving everything still queued
    /// as shutting down.
    pub async fn run(mut self) {
        let tick_ms = (1000u64 / self.cfg.qps.max(1) as u64).max(50);
        let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
        let (done_tx, mut done_rx) = mpsc::channel::<(String, IntrospectResult)>(64);

        loop {
            tokio::select! {
                job = self.work_rx.recv() => match job {
                    Some(job) => self.enqueue(job).await,
                    None => break,
                },
                Some((sig, result)) = done_rx.recv() => {
                    self.sig_cache.insert(sig.clone(), result.clone()).await;
                    self.resolve(&sig, result);
                },
                _ = tick.tick() => self.drain_one(&done_tx).await,
            }
        }

        for (_, (_, waiters)) in self.pending.drain() {
            for w in waiters {
                let _ = w.send(IntrospectResult::miss("shutting-down"));
            }
        }
        self.queue.clear();
        debug!("introspection worker drained and stopped");
    }

    async fn enqueue(&mut self, job: Job) {
        if let Some(hit) = self.sig_cache.get(&job.signature).await {
            let _ = job.reply.send(hit);
            return;
        }
        match self.pending.get_mut(&job.signature) {
            Some((_, waiters)) => waiters.push(job.reply),
            None => {
                self.pending
                    .insert(job.signature.clone(), (job.origin, vec![job.reply]));
                self.queue.push_back(job.signature);
            }
        }
    }

    fn resolve(&mut self, signature: &str, result: IntrospectResult) {
        if let Some((_, waiters)) = self.pending.remove(signature) {
            for w in waiters {
                let _ = w.send(result.clone());
            }
        }
    }

    async fn drain_one(&mut self, done_tx: &mpsc::Sender<(String, IntrospectResult)>) {
        let now = now_ms();
        while let Some(ts) = self.window.front() {
            if now.saturating_sub(*ts) >= ROLLING_WINDOW_MS {
                self.window.pop_front();
            } else {
                break;
            }
        }

        let Some(signature) = self.queue.pop_front() else {
            return;
        };

        if self.window.len() >= self.cfg.max_per_min as usize {
            // Over the rolling-minute cap: resolve without caching so a
            // later retry can still succeed.
            self.counters.bump_rate_capped().await;
            self.resolve(&signature, IntrospectResult::miss("rate-cap"));
            return;
        }
        if self.limiter.check().is_err() {
            self.queue.push_front(signature);
            return;
        }
        self.window.push_back(now);

        let rpc = self.rpc.clone();
        let validator = self.validator.clone();
        let counters = self.counters.clone();
        let owner_cache = self.owner_cache.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let result =
                introspect_signature(&rpc, &validator, &owner_cache, &counters, &signature).await;
            let _ = done_tx.send((signature, result)).await;
        });
    }
}

/// Fetch the transaction and pick the mint with the largest fresh positive
/// token-balance delta, then derive the receiving token account's owner.
async fn introspect_signature(
    rpc: &RpcClient,
    validator: &MintValidator,
    owner_cache: &Cache<String, String>,
    counters: &FeedCounters,
    signature: &str,
) -> IntrospectResult {
    let Ok(sig) = Signature::from_str(signature) else {
        return IntrospectResult::miss("tx-fetch-error");
    };
    let config = RpcTransactionConfig {
        encoding: Some(UiTransactionEncoding::Base64),
        commitment: Some(CommitmentConfig::confirmed()),
        max_supported_transaction_version: Some(0),
    };
    let tx = match rpc.get_transaction_with_config(&sig, config).await {
        Ok(tx) => tx,
        Err(e) => {
            counters.bump_tx_fetch_error().await;
            debug!(signature, error = %e, "transaction fetch failed");
            return IntrospectResult::miss("tx-fetch-error");
        }
    };

    let Some(meta) = tx.transaction.meta else {
        counters.bump_tx_fetch_error().await;
        return IntrospectResult::miss("tx-fetch-error");
    };
    let pre: Vec<UiTransactionTokenBalance> = match meta.pre_token_balances {
        OptionSerializer::Some(v) => v,
        _ => Vec::new(),
    };
    let post: Vec<UiTransactionTokenBalance> = match meta.post_token_balances {
        OptionSerializer::Some(v) => v,
        _ => Vec::new(),
    };

    let mut pre_totals: HashMap<&str, f64> = HashMap::new();
    for b in &pre {
        *pre_totals.entry(b.mint.as_str()).or_insert(0.0) +=
            b.ui_token_amount.ui_amount.unwrap_or(0.0);
    }
    let mut post_totals: HashMap<&str, f64> = HashMap::new();
    for b in &post {
        *post_totals.entry(b.mint.as_str()).or_insert(0.0) +=
            b.ui_token_amount.ui_amount.unwrap_or(0.0);
    }

    // Candidates in post-balance appearance order so the delta sort has a
    // deterministic tie-break.
    let mut candidates: Vec<(String, f64)> = Vec::new();
    for b in &post {
        if candidates.iter().any(|(m, _)| m == &b.mint) {
            continue;
        }
        let pre_ui = pre_totals.get(b.mint.as_str()).copied().unwrap_or(0.0);
        let post_ui = post_totals.get(b.mint.as_str()).copied().unwrap_or(0.0);
        if pre_ui.abs() < 1e-9 && post_ui > 0.0 {
            candidates.push((b.mint.clone(), post_ui));
        }
    }

    let mut real: Vec<(String, f64)> = Vec::new();
    for (mint, delta) in candidates {
        if validator.is_valid_mint(&mint) && validator.is_real_mint(&mint).await {
            real.push((mint, delta));
        }
    }
    real.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let Some((chosen, _)) = real.into_iter().next() else {
        return IntrospectResult::miss("no-real-mint");
    };

    let buyer = derive_owner(rpc, owner_cache, &tx.transaction.transaction, &pre, &post, &chosen)
        .await;

    IntrospectResult {
        mint: Some(chosen),
        buyer,
        reason: None,
    }
}

/// Resolve the owner of the token account that received the chosen mint:
/// the post balance with `pre ~ 0 && post > 0`, mapped through the
/// transaction's account keys, owner read from bytes `[32, 64)` of the
/// token-account data.
async fn derive_owner(
    rpc: &RpcClient,
    owner_cache: &Cache<String, String>,
    encoded: &solana_transaction_status::EncodedTransaction,
    pre: &[UiTransactionTokenBalance],
    post: &[UiTransactionTokenBalance],
    mint: &str,
) -> Option<String> {
    let account_index = post.iter().find_map(|b| {
        if b.mint != mint {
            return None;
        }
        let post_ui = b.ui_token_amount.ui_amount.unwrap_or(0.0);
        let pre_ui = pre
            .iter()
            .find(|p| p.account_index == b.account_index && p.mint == mint)
            .and_then(|p| p.ui_token_amount.ui_amount)
            .unwrap_or(0.0);
        (pre_ui.abs() < 1e-9 && post_ui > 0.0).then_some(b.account_index)
    })?;

    let decoded = encoded.decode()?;
    let keys = decoded.message.static_account_keys();
    let token_account = keys.get(account_index as usize)?.to_string();

    if let Some(owner) = owner_cache.get(&token_account).await {
        return Some(owner);
    }

    let pubkey = Pubkey::from_str(&token_account).ok()?;
    match rpc.get_account(&pubkey).await {
        Ok(account) if account.data.len() >= 64 => {
            let owner = Pubkey::try_from(&account.data[32..64]).ok()?.to_string();
            owner_cache.insert(token_account, owner.clone()).await;
            Some(owner)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(token_account, error = %e, "token account fetch failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn handle(mode: TxLookupMode) -> (TxIntrospector, IntrospectorWorker) {
        let cfg = TxLookupConfig {
            mode,
            qps: 5,
            max_per_min: 10,
        };
        let rpc = Arc::new(RpcClient::new("http://127.0.0.1:1".to_string()));
        let validator = MintValidator::new(HashSet::new(), None, 3600);
        TxIntrospector::new(cfg, rpc, validator, FeedCounters::new(0))
    }

    #[tokio::test]
    async fn off_mode_resolves_empty_without_worker() {
        let (introspector, _worker) = handle(TxLookupMode::Off);
        let r = introspector.lookup("sig", Origin::Pumpfun).await;
        assert!(r.mint.is_none());
        assert!(r.reason.is_none());
    }

    #[tokio::test]
    async fn pumpfun_only_skips_other_origins() {
        let (introspector, _worker) = handle(TxLookupMode::PumpfunOnly);
        let r = introspector.lookup("sig", Origin::Raydium).await;
        assert!(r.mint.is_none());
        assert!(r.reason.is_none());
    }

    #[tokio::test]
    async fn dropped_worker_resolves_shutting_down() {
        let (introspector, worker) = handle(TxLookupMode::All);
        drop(worker);
        let r = introspector.lookup("sig", Origin::Pumpfun).await;
        assert_eq!(r.reason, Some("shutting-down"));
    }
}
