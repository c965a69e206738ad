//! Mint address validation.
//!
//! Two layers: a pure shape test (`is_valid_mint`) that never touches the
//! network, and an on-chain confirmation (`is_real_mint`) with a TTL cache
//! capped at 10 000 entries, evicting the earliest-inserted 5% when over.

use crate::types::now_ms;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::debug;

/// SPL token program that owns every fungible-token mint account.
const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// Byte length of an SPL mint account's data payload.
const MINT_ACCOUNT_DATA_LEN: usize = 82;

/// Well-known system and infrastructure ids that can never be a token mint
/// even though they pass the base58 shape test.
const DENYLIST: [&str; 10] = [
    "11111111111111111111111111111111",
    "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
    "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb",
    "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
    "ComputeBudget111111111111111111111111111111",
    "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr",
    "SysvarRent111111111111111111111111111111111",
    "SysvarC1ock11111111111111111111111111111111",
    "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s",
    "So11111111111111111111111111111111111111112",
];

const CACHE_CAP: usize = 10_000;

/// Share of entries dropped (earliest inserted first) when the cache
/// exceeds its cap.
const EVICT_SHARE: f64 = 0.05;

struct RealMintCache {
    verdicts: HashMap<String, (u64, bool)>,
    insertion_order: VecDeque<String>,
}

impl RealMintCache {
    fn new() -> Self {
        Self {
            verdicts: HashMap::new(),
            insertion_order: VecDeque::new(),
        }
    }

    fn get(&self, addr: &str, now: u64, ttl_ms: u64) -> Option<bool> {
        match self.verdicts.get(addr) {
            Some((inserted, ok)) if now.saturating_sub(*inserted) <= ttl_ms => Some(*ok),
            _ => None,
        }
    }

    fn insert(&mut self, addr: String, ok: bool, now: u64) {
        if self.verdicts.insert(addr.clone(), (now, ok)).is_none() {
            self.insertion_order.push_back(addr);
        }
        if self.verdicts.len() > CACHE_CAP {
            let evict = ((CACHE_CAP as f64) * EVICT_SHARE).ceil() as usize;
            for _ in 0..evict {
                if let Some(oldest) = self.insertion_order.pop_front() {
                    self.verdicts.remove(&oldest);
                }
            }
            debug!(evicted = evict, "mint verdict cache over cap, evicted oldest entries");
        }
    }
}

/// Mint validator with a shared verdict cache. Cloning shares the cache, so
/// the watcher pipeline and the transaction introspector see one set of
/// verdicts.
#[derive(Clone)]
pub struct MintValidator {
    /// All subscribed program ids; a candidate matching one is never a mint.
    program_ids: Arc<HashSet<String>>,
    rpc: Option<Arc<RpcClient>>,
    ttl_ms: u64,
    cache: Arc<Mutex<RealMintCache>>,
}

impl MintValidator {
    pub fn new(program_ids: HashSet<String>, rpc: Option<Arc<RpcClient>>, ttl_sec: u64) -> Self {
        Self {
            program_ids: Arc::new(program_ids),
            rpc,
            ttl_ms: ttl_sec.max(60) * 1000,
            cache: Arc::new(Mutex::new(RealMintCache::new())),
        }
    }

    /// Pure shape test: 32-44 chars of base58, not a well-known system id,
    /// not one of our subscribed program ids.
    pub fn is_valid_mint(&self, addr: &str) -> bool {
        if !is_base58_id(addr) {
            return false;
        }
        if DENYLIST.contains(&addr) {
            return false;
        }
        !self.program_ids.contains(addr)
    }

    /// On-chain confirmation that `addr` is a live fungible-token mint:
    /// the account exists, is owned by the SPL token program, and carries
    /// an 82-byte data payload. Any fetch error caches `false`.
    pub async fn is_real_mint(&self, addr: &str) -> bool {
        let now = now_ms();
        {
            let cache = self.cache.lock().await;
            if let Some(ok) = cache.get(addr, now, self.ttl_ms) {
                return ok;
            }
        }

        let ok = self.fetch_is_real(addr).await;
        let mut cache = self.cache.lock().await;
        cache.insert(addr.to_string(), ok, now);
        ok
    }

    async fn fetch_is_real(&self, addr: &str) -> bool {
        let Some(rpc) = &self.rpc else {
            return false;
        };
        let Ok(pubkey) = Pubkey::from_str(addr) else {
            return false;
        };
        // A transient fetch failure would otherwise pin a false verdict
        // for the whole cache TTL, so the read gets a short retry budget
        // before the error is cached.
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .take(2);
        match Retry::spawn(retry_strategy, || rpc.get_account(&pubkey)).await {
            Ok(account) => {
                account.owner.to_string() == TOKEN_PROGRAM_ID
                    && account.data.len() == MINT_ACCOUNT_DATA_LEN
            }
            Err(e) => {
                debug!(addr, error = %e, "mint account fetch failed, caching false");
                false
            }
        }
    }

    #[cfg(test)]
    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.verdicts.len()
    }

    #[cfg(test)]
    pub async fn seed_verdict(&self, addr: &str, ok: bool) {
        let now = now_ms();
        self.cache.lock().await.insert(addr.to_string(), ok, now);
    }
}

/// Base58 alphabet and length test for a chain address.
pub fn is_base58_id(s: &str) -> bool {
    (32..=44).contains(&s.len())
        && s.bytes().all(|b| {
            matches!(b,
                b'1'..=b'9'
                | b'A'..=b'H' | b'J'..=b'N' | b'P'..=b'Z'
                | b'a'..=b'k' | b'm'..=b'z')
        })
}
