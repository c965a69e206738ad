//! Per-origin log parsing.
//!
//! Turns a batch of raw program log lines into at most one mint, buyer and
//! creator candidate, picked from key/value pairs by per-origin priority
//! lists. Every candidate passes the mint shape test before it is returned.

use crate::pipeline::validator::{is_base58_id, MintValidator};
use crate::types::{EventKind, Origin, ParseResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// `key: value` / `key=value` pairs where the value looks like an address.
static KV_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z][A-Za-z0-9_]{2,32})\s*[:=]\s*([1-9A-HJ-NP-Za-km-z]{32,44})\b")
        .expect("kv regex")
});

/// Any standalone base58 token of address length.
static B58_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[1-9A-HJ-NP-Za-km-z]{32,44}\b").expect("base58 regex"));

const PUMPFUN_MINT_KEYS: &[&str] = &[
    "mint",
    "token_mint",
    "tokenmint",
    "mint_address",
    "mintaddress",
    "mintpubkey",
    "mintkey",
    "targetmint",
    "token",
    "token_address",
    "tokenaddress",
    "token_pubkey",
    "tokenpubkey",
];

const MOONSHOT_MINT_KEYS: &[&str] = &[
    "mint",
    "mint_address",
    "mintaddress",
    "token_mint",
    "tokenmint",
    "targetmint",
    "token",
];

const CREATOR_KEYS: &[&str] = &[
    "creator",
    "deployer",
    "owner",
    "authority",
    "payer",
    "creatorauthority",
];

const BUYER_KEYS: &[&str] = &[
    "buyer",
    "user",
    "owner",
    "trader",
    "authority",
    "account_owner",
    "token_owner",
    "wallet",
];

pub struct LogParser;

impl LogParser {
    /// Scan one log batch. The mint key priority list is per origin;
    /// origins without a dedicated list use the pumpfun one, it being the
    /// superset.
    pub fn parse(origin: Origin, lines: &[String], validator: &MintValidator) -> ParseResult {
        let joined = lines.join("\n");
        let lowered = joined.to_lowercase();

        let kind = classify(&lowered, origin);

        // First-wins key -> value map plus the set of all address-shaped
        // tokens in appearance order.
        let mut kv: HashMap<String, &str> = HashMap::new();
        for caps in KV_RE.captures_iter(&joined) {
            let key = caps.get(1).map(|m| m.as_str().to_lowercase());
            let value = caps.get(2).map(|m| m.as_str());
            if let (Some(key), Some(value)) = (key, value) {
                kv.entry(key).or_insert(value);
            }
        }
        let mut candidates: Vec<&str> = Vec::new();
        for m in B58_RE.find_iter(&joined) {
            if !candidates.contains(&m.as_str()) {
                candidates.push(m.as_str());
            }
        }

        let mint_keys: &[&str] = match origin {
            Origin::Moonshot => MOONSHOT_MINT_KEYS,
            _ => PUMPFUN_MINT_KEYS,
        };

        let mint = pick(&kv, mint_keys, validator);
        let creator = pick(&kv, CREATOR_KEYS, validator);
        let buyer = pick(&kv, BUYER_KEYS, validator);

        if let Some(mint) = mint {
            return ParseResult {
                mint: Some(mint),
                buyer,
                creator,
                kind: Some(kind),
                miss: None,
            };
        }

        // Create events without a keyed mint: a single plausible address in
        // the whole batch is taken to be the mint.
        if kind == EventKind::Create {
            let valid: Vec<&&str> = candidates
                .iter()
                .filter(|c| validator.is_valid_mint(c))
                .collect();
            if valid.len() == 1 {
                return ParseResult {
                    mint: Some(valid[0].to_string()),
                    buyer,
                    creator,
                    kind: Some(kind),
                    miss: None,
                };
            }
            let miss = if valid.is_empty() {
                "create-without-mint"
            } else {
                "create-ambiguous-mint"
            };
            return ParseResult {
                mint: None,
                buyer,
                creator,
                kind: Some(kind),
                miss: Some(miss),
            };
        }

        ParseResult {
            mint: None,
            buyer,
            creator,
            kind: Some(kind),
            miss: Some("no-mint-key"),
        }
    }
}

fn classify(lowered: &str, origin: Origin) -> EventKind {
    if lowered.contains("create") || lowered.contains("initializemint") {
        EventKind::Create
    } else if lowered.contains("buy") {
        EventKind::Buy
    } else if (lowered.contains("addliquidity") || lowered.contains("add_liquidity"))
        && origin == Origin::Pumpfun
    {
        EventKind::AddLiquidity
    } else {
        EventKind::Unknown
    }
}

fn pick(kv: &HashMap<String, &str>, keys: &[&str], validator: &MintValidator) -> Option<String> {
    for key in keys {
        if let Some(value) = kv.get(*key) {
            if is_base58_id(value) && validator.is_valid_mint(value) {
                return Some((*value).to_string());
            }
        }
    }
    None
}
