//! Storage abstraction layer.
//!
//! Defines the formal contract for persistence so the decision pipeline can
//! be tested against any backend. The production implementation is
//! [`sqlite::SqliteStore`].

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::types::{Origin, Snapshot};
use anyhow::Result;
use async_trait::async_trait;

/// Current schema version, recorded under `meta.schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Order statuses that count as an accept.
pub fn is_accept_status(status: &str) -> bool {
    matches!(status, "dry_run" | "accepted")
}

/// Observed-token upsert; repeated sightings bump `seen_count` and
/// `last_seen_ts`.
#[derive(Debug, Clone)]
pub struct TokenUpsert {
    pub mint: String,
    pub origin: Origin,
    pub creator: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub ts: u64,
}

/// One emitted microstructure observation.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub ts: u64,
    pub signature: Option<String>,
    pub mint: String,
    pub origin: Origin,
    pub creator: Option<String>,
    pub snapshot: Snapshot,
}

/// The unitary entry decision row, keyed `(market, "unitary-entry")`.
#[derive(Debug, Clone)]
pub struct EntryOrderRow {
    pub market: String,
    pub mint: String,
    pub origin: Origin,
    pub status: String,
    pub size_tier: Option<String>,
    pub quantity_base: f64,
    pub decided_ts: u64,
    pub notes: Option<String>,
}

/// Summary of a persisted unitary-entry order.
#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub market: String,
    pub mint: Option<String>,
    pub origin: Option<String>,
    pub status: String,
    pub size_tier: Option<String>,
    pub decided_ts: Option<i64>,
    pub notes: Option<String>,
}

/// One estimated fill quote.
#[derive(Debug, Clone)]
pub struct QuoteRow {
    pub ts: u64,
    pub mint: String,
    pub origin: Origin,
    pub route: String,
    pub size_sol: f64,
    pub est_fill_price_sol: Option<f64>,
    pub est_slippage_bps: Option<f64>,
    pub reserves_json: Option<String>,
}

/// An active trading halt.
#[derive(Debug, Clone)]
pub struct HaltRow {
    pub market: String,
    pub reason: Option<String>,
    pub created_at: i64,
}

/// Formal persistence contract for the decision pipeline and its status
/// surface.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert or refresh an observed token.
    async fn upsert_token(&self, row: &TokenUpsert) -> Result<()>;

    /// Append one microstructure observation.
    async fn insert_event(&self, row: &EventRow) -> Result<()>;

    /// Upsert the unitary entry row for a market. Never overwrites a prior
    /// row whose status is an accept; a unique-constraint conflict means
    /// the accept already exists and is ignored.
    async fn upsert_unitary_entry(&self, row: &EntryOrderRow) -> Result<()>;

    /// In-place SMALL to APEX upgrade of an accepted unitary entry.
    async fn upgrade_unitary_tier(&self, market: &str, tier: &str, decided_ts: u64) -> Result<()>;

    /// Read back the unitary entry row for a market, if any.
    async fn unitary_entry(&self, market: &str) -> Result<Option<OrderSummary>>;

    /// Append one fill quote estimate.
    async fn insert_quote(&self, row: &QuoteRow) -> Result<()>;

    async fn schema_version(&self) -> Result<i64>;

    async fn open_positions_count(&self) -> Result<i64>;

    /// Realized PnL summed over trades created at or after `ts_ms`.
    async fn realized_pnl_since(&self, ts_ms: u64) -> Result<f64>;

    async fn active_halts(&self) -> Result<Vec<HaltRow>>;

    /// Tip spend recorded for a day (`YYYY-MM-DD`).
    async fn tips_spent(&self, day: &str) -> Result<f64>;

    /// Record a tip spend against the daily budget. Returns `false` (and
    /// records nothing) when the spend would exceed the budget.
    async fn record_tip_spend(&self, day: &str, sol: f64, daily_budget: f64) -> Result<bool>;
}
