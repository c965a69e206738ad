//! Process configuration, loaded once at startup from environment variables.
//!
//! Every recognized option has a default; a present-but-unparseable value is
//! a fatal startup error so the process exits nonzero instead of running
//! with a silently wrong knob.

use crate::types::Origin;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Dual HTTP/WS endpoint pair with a backup for failover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEndpoints {
    pub http_primary: String,
    pub http_backup: String,
    pub ws_primary: String,
    pub ws_backup: String,
}

impl Default for RpcEndpoints {
    fn default() -> Self {
        Self {
            http_primary: "https://api.mainnet-beta.solana.com".to_string(),
            http_backup: "https://api.mainnet-beta.solana.com".to_string(),
            ws_primary: "wss://api.mainnet-beta.solana.com".to_string(),
            ws_backup: "wss://api.mainnet-beta.solana.com".to_string(),
        }
    }
}

/// Program-id lists per origin. Empty lists disable an origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramSets {
    pub pumpfun: Vec<String>,
    pub letsbonk: Vec<String>,
    pub moonshot: Vec<String>,
    pub raydium: Vec<String>,
    pub orca: Vec<String>,
}

impl ProgramSets {
    pub fn for_origin(&self, origin: Origin) -> &[String] {
        match origin {
            Origin::Pumpfun => &self.pumpfun,
            Origin::Letsbonk => &self.letsbonk,
            Origin::Moonshot => &self.moonshot,
            Origin::Raydium => &self.raydium,
            Origin::Orca => &self.orca,
        }
    }

    /// All configured program ids as one set, for the "mint is actually a
    /// program id" check.
    pub fn all_ids(&self) -> HashSet<String> {
        Origin::ALL
            .iter()
            .flat_map(|o| self.for_origin(*o).iter().cloned())
            .collect()
    }
}

/// Entry engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    pub min_score: i32,
    pub apex_score: i32,
    pub cooldown_sec: u64,
    pub reeval_cooldown_sec: u64,
    pub accept_cooldown_sec: u64,
    pub min_obs_buyers: usize,
    pub min_obs_unique: usize,
    pub hold_ttl_sec: u64,
    pub hold_max_reevals: u32,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            min_score: 60,
            apex_score: 80,
            cooldown_sec: 60,
            reeval_cooldown_sec: 2,
            accept_cooldown_sec: 60,
            min_obs_buyers: 6,
            min_obs_unique: 5,
            hold_ttl_sec: 900,
            hold_max_reevals: 0,
        }
    }
}

/// One (score, buyers) delta pair for heat loosening/tightening.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeatDelta {
    pub score: i32,
    pub buyers: i32,
}

/// One (score, buyers) bound pair for heat clamping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeatBound {
    pub score: i32,
    pub buyers: i32,
}

/// Heat controller tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatConfig {
    pub enabled: bool,
    pub window_min: u32,
    pub min_accepts_per_hr: f64,
    pub max_accepts_per_hr: f64,
    pub loosen_delta: HeatDelta,
    pub tighten_delta: HeatDelta,
    pub floor: HeatBound,
    pub ceil: HeatBound,
}

impl Default for HeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_min: 60,
            min_accepts_per_hr: 2.0,
            max_accepts_per_hr: 12.0,
            loosen_delta: HeatDelta { score: 5, buyers: 1 },
            tighten_delta: HeatDelta { score: 10, buyers: 2 },
            floor: HeatBound { score: 40, buyers: 4 },
            ceil: HeatBound { score: 90, buyers: 10 },
        }
    }
}

/// When (and whether) to confirm that a candidate address is a real
/// fungible-token mint on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MintVerifyMode {
    Eager,
    Deferred,
    Off,
}

impl FromStr for MintVerifyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eager" => Ok(MintVerifyMode::Eager),
            "deferred" => Ok(MintVerifyMode::Deferred),
            "off" => Ok(MintVerifyMode::Off),
            other => bail!("unknown mint verify mode: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintVerifyConfig {
    pub mode: MintVerifyMode,
    pub ttl_sec: u64,
}

impl Default for MintVerifyConfig {
    fn default() -> Self {
        Self {
            mode: MintVerifyMode::Deferred,
            ttl_sec: 3600,
        }
    }
}

/// Which origins qualify for targeted transaction introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxLookupMode {
    Off,
    PumpfunOnly,
    All,
}

impl FromStr for TxLookupMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(TxLookupMode::Off),
            "pumpfun_only" => Ok(TxLookupMode::PumpfunOnly),
            "all" => Ok(TxLookupMode::All),
            other => bail!("unknown tx lookup mode: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxLookupConfig {
    pub mode: TxLookupMode,
    pub qps: u32,
    pub max_per_min: u32,
}

impl Default for TxLookupConfig {
    fn default() -> Self {
        Self {
            mode: TxLookupMode::PumpfunOnly,
            qps: 5,
            max_per_min: 120,
        }
    }
}

/// Alerting filters and cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    pub accepted_only: bool,
    pub min_score: i32,
    pub rate_limit_sec: u64,
    pub summary_every_sec: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            accepted_only: false,
            min_score: 0,
            rate_limit_sec: 5,
            summary_every_sec: 300,
        }
    }
}

/// Pump-curve quote sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotesConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_minutes: u64,
    pub sizes_sol: Vec<f64>,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 5000,
            max_minutes: 15,
            sizes_sol: vec![0.1, 0.4],
        }
    }
}

/// Smart-money cohort wallets and the conviction boost they grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortConfig {
    pub wallets: Vec<String>,
    pub boost: i32,
    pub decay_sec: u64,
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self {
            wallets: Vec::new(),
            boost: 10,
            decay_sec: 300,
        }
    }
}

/// Entry size per tier, in SOL. Accept decisions are dry-run records; the
/// sizes are recorded on the order row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeTiers {
    pub small_sol: f64,
    pub apex_sol: f64,
}

impl Default for SizeTiers {
    fn default() -> Self {
        Self {
            small_sol: 0.1,
            apex_sol: 0.4,
        }
    }
}

/// Jito tip budgeting, recorded in the tips ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipsConfig {
    pub daily_budget_sol: f64,
    pub per_trade_cap_sol: f64,
}

impl Default for TipsConfig {
    fn default() -> Self {
        Self {
            daily_budget_sol: 0.5,
            per_trade_cap_sol: 0.01,
        }
    }
}

/// Telegram credentials; alerts are disabled when either is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Immutable process-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub db_path: String,
    pub rpc: RpcEndpoints,
    pub programs: ProgramSets,
    pub tips: TipsConfig,
    pub telegram: TelegramConfig,
    pub dry_run: bool,
    pub sizes: SizeTiers,
    pub entry: EntryConfig,
    pub heat: HeatConfig,
    pub mint_verify: MintVerifyConfig,
    pub tx_lookup: TxLookupConfig,
    pub alerts: AlertsConfig,
    pub quotes: QuotesConfig,
    pub cohort: CohortConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8787,
            log_level: "info".to_string(),
            db_path: "./data/mintwatch.sqlite".to_string(),
            rpc: RpcEndpoints::default(),
            programs: ProgramSets {
                pumpfun: vec!["6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P".to_string()],
                letsbonk: vec![],
                moonshot: vec!["MoonCVVNZFSYkqNXP6bxHLPL6QQJiMagDL3qcqUQTrG".to_string()],
                raydium: vec![],
                orca: vec![],
            },
            tips: TipsConfig::default(),
            telegram: TelegramConfig::default(),
            dry_run: true,
            sizes: SizeTiers::default(),
            entry: EntryConfig::default(),
            heat: HeatConfig::default(),
            mint_verify: MintVerifyConfig::default(),
            tx_lookup: TxLookupConfig::default(),
            alerts: AlertsConfig::default(),
            quotes: QuotesConfig::default(),
            cohort: CohortConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment (a `.env` file is honored
    /// when present). Missing variables fall back to defaults; unparseable
    /// ones are fatal.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let d = Config::default();

        Ok(Self {
            http_port: env_parse("MW_HTTP_PORT", d.http_port)?,
            log_level: env_string("MW_LOG_LEVEL", &d.log_level),
            db_path: env_string("MW_DB_PATH", &d.db_path),
            rpc: RpcEndpoints {
                http_primary: env_string("MW_RPC_HTTP_PRIMARY", &d.rpc.http_primary),
                http_backup: env_string("MW_RPC_HTTP_BACKUP", &d.rpc.http_backup),
                ws_primary: env_string("MW_RPC_WS_PRIMARY", &d.rpc.ws_primary),
                ws_backup: env_string("MW_RPC_WS_BACKUP", &d.rpc.ws_backup),
            },
            programs: ProgramSets {
                pumpfun: env_list("MW_PROGRAMS_PUMPFUN", &d.programs.pumpfun),
                letsbonk: env_list("MW_PROGRAMS_LETSBONK", &d.programs.letsbonk),
                moonshot: env_list("MW_PROGRAMS_MOONSHOT", &d.programs.moonshot),
                raydium: env_list("MW_PROGRAMS_RAYDIUM", &d.programs.raydium),
                orca: env_list("MW_PROGRAMS_ORCA", &d.programs.orca),
            },
            tips: TipsConfig {
                daily_budget_sol: env_parse("MW_TIPS_DAILY_BUDGET_SOL", d.tips.daily_budget_sol)?,
                per_trade_cap_sol: env_parse("MW_TIPS_PER_TRADE_CAP_SOL", d.tips.per_trade_cap_sol)?,
            },
            telegram: TelegramConfig {
                bot_token: env_string("MW_TELEGRAM_BOT_TOKEN", ""),
                chat_id: env_string("MW_TELEGRAM_CHAT_ID", ""),
            },
            dry_run: env_parse("MW_DRY_RUN", d.dry_run)?,
            sizes: SizeTiers {
                small_sol: env_parse("MW_SIZE_SMALL_SOL", d.sizes.small_sol)?,
                apex_sol: env_parse("MW_SIZE_APEX_SOL", d.sizes.apex_sol)?,
            },
            entry: EntryConfig {
                min_score: env_parse("MW_ENTRY_MIN_SCORE", d.entry.min_score)?,
                apex_score: env_parse("MW_ENTRY_APEX_SCORE", d.entry.apex_score)?,
                cooldown_sec: env_parse("MW_ENTRY_COOLDOWN_SEC", d.entry.cooldown_sec)?,
                reeval_cooldown_sec: env_parse(
                    "MW_ENTRY_REEVAL_COOLDOWN_SEC",
                    d.entry.reeval_cooldown_sec,
                )?,
                accept_cooldown_sec: env_parse(
                    "MW_ENTRY_ACCEPT_COOLDOWN_SEC",
                    d.entry.accept_cooldown_sec,
                )?,
                min_obs_buyers: env_parse("MW_ENTRY_MIN_OBS_BUYERS", d.entry.min_obs_buyers)?,
                min_obs_unique: env_parse("MW_ENTRY_MIN_OBS_UNIQUE", d.entry.min_obs_unique)?,
                hold_ttl_sec: env_parse("MW_ENTRY_HOLD_TTL_SEC", d.entry.hold_ttl_sec)?,
                hold_max_reevals: env_parse("MW_ENTRY_HOLD_MAX_REEVALS", d.entry.hold_max_reevals)?,
            },
            heat: HeatConfig {
                enabled: env_parse("MW_HEAT_ENABLED", d.heat.enabled)?,
                window_min: env_parse("MW_HEAT_WINDOW_MIN", d.heat.window_min)?,
                min_accepts_per_hr: env_parse("MW_HEAT_MIN_ACCEPTS_PER_HR", d.heat.min_accepts_per_hr)?,
                max_accepts_per_hr: env_parse("MW_HEAT_MAX_ACCEPTS_PER_HR", d.heat.max_accepts_per_hr)?,
                loosen_delta: HeatDelta {
                    score: env_parse("MW_HEAT_LOOSEN_SCORE", d.heat.loosen_delta.score)?,
                    buyers: env_parse("MW_HEAT_LOOSEN_BUYERS", d.heat.loosen_delta.buyers)?,
                },
                tighten_delta: HeatDelta {
                    score: env_parse("MW_HEAT_TIGHTEN_SCORE", d.heat.tighten_delta.score)?,
                    buyers: env_parse("MW_HEAT_TIGHTEN_BUYERS", d.heat.tighten_delta.buyers)?,
                },
                floor: HeatBound {
                    score: env_parse("MW_HEAT_FLOOR_SCORE", d.heat.floor.score)?,
                    buyers: env_parse("MW_HEAT_FLOOR_BUYERS", d.heat.floor.buyers)?,
                },
                ceil: HeatBound {
                    score: env_parse("MW_HEAT_CEIL_SCORE", d.heat.ceil.score)?,
                    buyers: env_parse("MW_HEAT_CEIL_BUYERS", d.heat.ceil.buyers)?,
                },
            },
            mint_verify: MintVerifyConfig {
                mode: env_parse_from("MW_MINT_VERIFY_MODE", d.mint_verify.mode)?,
                ttl_sec: env_parse("MW_MINT_VERIFY_TTL_SEC", d.mint_verify.ttl_sec)?.max(60),
            },
            tx_lookup: TxLookupConfig {
                mode: env_parse_from("MW_TX_LOOKUP_MODE", d.tx_lookup.mode)?,
                qps: env_parse("MW_TX_LOOKUP_QPS", d.tx_lookup.qps)?,
                max_per_min: env_parse("MW_TX_LOOKUP_MAX_PER_MIN", d.tx_lookup.max_per_min)?,
            },
            alerts: AlertsConfig {
                accepted_only: env_parse("MW_ALERTS_ACCEPTED_ONLY", d.alerts.accepted_only)?,
                min_score: env_parse("MW_ALERTS_MIN_SCORE", d.alerts.min_score)?,
                rate_limit_sec: env_parse("MW_ALERTS_RATE_LIMIT_SEC", d.alerts.rate_limit_sec)?,
                summary_every_sec: env_parse("MW_ALERTS_SUMMARY_EVERY_SEC", d.alerts.summary_every_sec)?,
            },
            quotes: QuotesConfig {
                enabled: env_parse("MW_QUOTES_ENABLED", d.quotes.enabled)?,
                interval_ms: env_parse("MW_QUOTES_INTERVAL_MS", d.quotes.interval_ms)?,
                max_minutes: env_parse("MW_QUOTES_MAX_MINUTES", d.quotes.max_minutes)?,
                sizes_sol: env_f64_list("MW_QUOTES_SIZES_SOL", &d.quotes.sizes_sol)?,
            },
            cohort: CohortConfig {
                wallets: env_list("MW_COHORT_WALLETS", &d.cohort.wallets),
                boost: env_parse("MW_COHORT_BOOST", d.cohort.boost)?,
                decay_sec: env_parse("MW_COHORT_DECAY_SEC", d.cohort.decay_sec)?,
            },
        })
    }

    /// Every subscribed program id, deduplicated, each paired with the
    /// first origin (in priority order) that configures it.
    pub fn subscriptions(&self) -> Vec<(String, Origin)> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for origin in Origin::ALL {
            for pid in self.programs.for_origin(origin) {
                if seen.insert(pid.clone()) {
                    out.push((pid.clone(), origin));
                }
            }
        }
        out
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[String]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default.to_vec(),
    }
}

fn env_f64_list(key: &str, default: &[f64]) -> Result<Vec<f64>> {
    match std::env::var(key) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<f64>().with_context(|| format!("invalid float in {key}: {s}")))
            .collect(),
        Err(_) => Ok(default.to_vec()),
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_parse_from<T: FromStr<Err = anyhow::Error>>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().with_context(|| format!("invalid value for {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.entry.min_score, 60);
        assert_eq!(cfg.entry.apex_score, 80);
        assert!(cfg.dry_run);
        assert!(cfg.heat.window_min >= 1);
        assert!(cfg.mint_verify.ttl_sec >= 60);
    }

    #[test]
    fn subscriptions_dedup_keeps_first_origin() {
        let mut cfg = Config::default();
        cfg.programs.pumpfun = vec!["Prog111".to_string(), "Shared111".to_string()];
        cfg.programs.raydium = vec!["Shared111".to_string(), "Prog222".to_string()];
        let subs = cfg.subscriptions();
        assert_eq!(subs.len(), 4);
        let shared = subs.iter().find(|(p, _)| p == "Shared111").unwrap();
        assert_eq!(shared.1, Origin::Pumpfun);
    }

    #[test]
    fn tx_lookup_mode_parses() {
        assert_eq!("off".parse::<TxLookupMode>().unwrap(), TxLookupMode::Off);
        assert_eq!(
            "pumpfun_only".parse::<TxLookupMode>().unwrap(),
            TxLookupMode::PumpfunOnly
        );
        assert!("bogus".parse::<TxLookupMode>().is_err());
    }
}
