//! SQLite implementation of the ledger store.
//!
//! Opens in WAL mode with foreign keys on and a 3000 ms busy timeout, and
//! creates the schema idempotently. Hot-path writes are single prepared
//! statements; multi-step writes go through a transaction.

use super::{
    EntryOrderRow, EventRow, HaltRow, LedgerStore, OrderSummary, QuoteRow, TokenUpsert,
    SCHEMA_VERSION,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

#[derive(FromRow)]
struct OrderRowDb {
    market: String,
    mint: Option<String>,
    origin: Option<String>,
    status: String,
    size_tier: Option<String>,
    decided_ts: Option<i64>,
    notes: Option<String>,
}

impl From<OrderRowDb> for OrderSummary {
    fn from(r: OrderRowDb) -> Self {
        Self {
            market: r.market,
            mint: r.mint,
            origin: r.origin,
            status: r.status,
            size_tier: r.size_tier,
            decided_ts: r.decided_ts,
            notes: r.notes,
        }
    }
}

#[derive(FromRow)]
struct HaltRowDb {
    market: String,
    reason: Option<String>,
    created_at: i64,
}

impl SqliteStore {
    /// Open (and create if missing) the database at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
            .with_context(|| format!("invalid sqlite path: {path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(3000));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to open sqlite database")?;
        let store = Self { pool };
        store.migrate().await?;
        info!(path, "sqlite store ready");
        Ok(store)
    }

    /// In-memory store for tests: one connection so every query sees the
    /// same database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(3000));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open in-memory sqlite")?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS meta(
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS positions(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market TEXT NOT NULL,
                direction TEXT NOT NULL CHECK(direction IN ('long','short')),
                size_base REAL NOT NULL,
                avg_entry_price REAL NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('open','closed')),
                opened_at INTEGER NOT NULL,
                closed_at INTEGER
            )",
            "CREATE TABLE IF NOT EXISTS orders(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_order_id TEXT,
                market TEXT NOT NULL,
                side TEXT NOT NULL CHECK(side IN ('buy','sell')),
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                quantity_base REAL NOT NULL,
                price REAL,
                position_id INTEGER REFERENCES positions(id),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                mint TEXT,
                origin TEXT,
                decided_ts INTEGER,
                size_tier TEXT,
                notes TEXT
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_unitary
                ON orders(market, type) WHERE type = 'unitary-entry'",
            "CREATE TABLE IF NOT EXISTS trades(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL REFERENCES positions(id),
                order_id INTEGER REFERENCES orders(id),
                price REAL NOT NULL,
                size_base REAL NOT NULL,
                fee_sol REAL NOT NULL DEFAULT 0,
                jito_tip_sol REAL NOT NULL DEFAULT 0,
                realized_pnl_sol REAL NOT NULL DEFAULT 0,
                liquidity TEXT CHECK(liquidity IN ('taker','maker')),
                signature TEXT,
                created_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS halts(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market TEXT NOT NULL,
                reason TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                cleared_at INTEGER
            )",
            "CREATE TABLE IF NOT EXISTS tips_ledger(
                day TEXT PRIMARY KEY,
                spent_sol REAL NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS tokens(
                mint TEXT PRIMARY KEY,
                first_seen_ts INTEGER NOT NULL,
                last_seen_ts INTEGER NOT NULL,
                origin TEXT NOT NULL,
                creator TEXT,
                name TEXT,
                symbol TEXT,
                seen_count INTEGER NOT NULL DEFAULT 1
            )",
            "CREATE TABLE IF NOT EXISTS events(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                signature TEXT,
                mint TEXT NOT NULL,
                origin TEXT NOT NULL,
                buyers INTEGER NOT NULL,
                unique_funders INTEGER NOT NULL,
                same_funder_ratio REAL NOT NULL,
                price_jumps INTEGER NOT NULL,
                depth_est REAL NOT NULL,
                creator TEXT,
                snapshot_json TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_events_mint_ts ON events(mint, ts)",
            "CREATE TABLE IF NOT EXISTS quotes(
                ts INTEGER NOT NULL,
                mint TEXT NOT NULL,
                origin TEXT NOT NULL,
                route TEXT NOT NULL,
                size_sol REAL NOT NULL,
                est_fill_price_sol REAL,
                est_slippage_bps REAL,
                reserves_json TEXT,
                PRIMARY KEY (mint, ts, size_sol)
            )",
        ];

        let mut tx = self.pool.begin().await?;
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("schema statement failed: {}", &stmt[..40.min(stmt.len())]))?;
        }
        sqlx::query(
            "INSERT INTO meta(key, value) VALUES('schema_version', ?)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(SCHEMA_VERSION.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn upsert_token(&self, row: &TokenUpsert) -> Result<()> {
        sqlx::query(
            "INSERT INTO tokens(mint, first_seen_ts, last_seen_ts, origin, creator, name, symbol, seen_count)
             VALUES(?, ?, ?, ?, ?, ?, ?, 1)
             ON CONFLICT(mint) DO UPDATE SET
                 last_seen_ts = excluded.last_seen_ts,
                 seen_count = tokens.seen_count + 1,
                 creator = COALESCE(tokens.creator, excluded.creator),
                 name = COALESCE(tokens.name, excluded.name),
                 symbol = COALESCE(tokens.symbol, excluded.symbol)",
        )
        .bind(&row.mint)
        .bind(row.ts as i64)
        .bind(row.ts as i64)
        .bind(row.origin.as_str())
        .bind(&row.creator)
        .bind(&row.name)
        .bind(&row.symbol)
        .execute(&self.pool)
        .await
        .context("token upsert failed")?;
        Ok(())
    }

    async fn insert_event(&self, row: &EventRow) -> Result<()> {
        let snapshot_json = serde_json::to_string(&row.snapshot)?;
        sqlx::query(
            "INSERT INTO events(ts, signature, mint, origin, buyers, unique_funders,
                                same_funder_ratio, price_jumps, depth_est, creator, snapshot_json)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.ts as i64)
        .bind(&row.signature)
        .bind(&row.mint)
        .bind(row.origin.as_str())
        .bind(row.snapshot.buyers as i64)
        .bind(row.snapshot.unique_funders as i64)
        .bind(row.snapshot.same_funder_ratio)
        .bind(row.snapshot.price_jumps as i64)
        .bind(row.snapshot.depth_est)
        .bind(&row.creator)
        .bind(snapshot_json)
        .execute(&self.pool)
        .await
        .context("event insert failed")?;
        Ok(())
    }

    async fn upsert_unitary_entry(&self, row: &EntryOrderRow) -> Result<()> {
        // A prior accepted row is never overwritten; the conflict is the
        // "accept already exists" case and is deliberately a no-op then.
        let result = sqlx::query(
            "INSERT INTO orders(market, side, type, status, quantity_base,
                                created_at, updated_at, mint, origin, decided_ts, size_tier, notes)
             VALUES(?, 'buy', 'unitary-entry', ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(market, type) WHERE type = 'unitary-entry' DO UPDATE SET
                 status = excluded.status,
                 quantity_base = excluded.quantity_base,
                 updated_at = excluded.updated_at,
                 decided_ts = excluded.decided_ts,
                 size_tier = excluded.size_tier,
                 notes = excluded.notes
             WHERE orders.status NOT IN ('dry_run', 'accepted')",
        )
        .bind(&row.market)
        .bind(&row.status)
        .bind(row.quantity_base)
        .bind(row.decided_ts as i64)
        .bind(row.decided_ts as i64)
        .bind(&row.mint)
        .bind(row.origin.as_str())
        .bind(row.decided_ts as i64)
        .bind(&row.size_tier)
        .bind(&row.notes)
        .execute(&self.pool)
        .await
        .context("unitary entry upsert failed")?;
        debug!(
            market = %row.market,
            status = %row.status,
            rows = result.rows_affected(),
            "unitary entry upsert"
        );
        Ok(())
    }

    async fn upgrade_unitary_tier(&self, market: &str, tier: &str, decided_ts: u64) -> Result<()> {
        sqlx::query(
            "UPDATE orders
             SET size_tier = ?, decided_ts = ?, updated_at = ?
             WHERE market = ? AND type = 'unitary-entry'
               AND status IN ('dry_run', 'accepted') AND size_tier = 'SMALL'",
        )
        .bind(tier)
        .bind(decided_ts as i64)
        .bind(decided_ts as i64)
        .bind(market)
        .execute(&self.pool)
        .await
        .context("unitary entry tier upgrade failed")?;
        Ok(())
    }

    async fn unitary_entry(&self, market: &str) -> Result<Option<OrderSummary>> {
        let row: Option<OrderRowDb> = sqlx::query_as(
            "SELECT market, mint, origin, status, size_tier, decided_ts, notes
             FROM orders WHERE market = ? AND type = 'unitary-entry'",
        )
        .bind(market)
        .fetch_optional(&self.pool)
        .await
        .context("unitary entry read failed")?;
        Ok(row.map(Into::into))
    }

    async fn insert_quote(&self, row: &QuoteRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO quotes(ts, mint, origin, route, size_sol,
                                est_fill_price_sol, est_slippage_bps, reserves_json)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(mint, ts, size_sol) DO NOTHING",
        )
        .bind(row.ts as i64)
        .bind(&row.mint)
        .bind(row.origin.as_str())
        .bind(&row.route)
        .bind(row.size_sol)
        .bind(row.est_fill_price_sol)
        .bind(row.est_slippage_bps)
        .bind(&row.reserves_json)
        .execute(&self.pool)
        .await
        .context("quote insert failed")?;
        Ok(())
    }

    async fn schema_version(&self) -> Result<i64> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM meta WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    async fn open_positions_count(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM positions WHERE status = 'open'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn realized_pnl_since(&self, ts_ms: u64) -> Result<f64> {
        let pnl: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(realized_pnl_sol), 0.0) FROM trades WHERE created_at >= ?",
        )
        .bind(ts_ms as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(pnl)
    }

    async fn active_halts(&self) -> Result<Vec<HaltRow>> {
        let rows: Vec<HaltRowDb> =
            sqlx::query_as("SELECT market, reason, created_at FROM halts WHERE active = 1")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|r| HaltRow {
                market: r.market,
                reason: r.reason,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn tips_spent(&self, day: &str) -> Result<f64> {
        let spent: Option<f64> =
            sqlx::query_scalar("SELECT spent_sol FROM tips_ledger WHERE day = ?")
                .bind(day)
                .fetch_optional(&self.pool)
                .await?;
        Ok(spent.unwrap_or(0.0))
    }

    async fn record_tip_spend(&self, day: &str, sol: f64, daily_budget: f64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let spent: Option<f64> =
            sqlx::query_scalar("SELECT spent_sol FROM tips_ledger WHERE day = ?")
                .bind(day)
                .fetch_optional(&mut *tx)
                .await?;
        let spent = spent.unwrap_or(0.0);
        if spent + sol > daily_budget {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(
            "INSERT INTO tips_ledger(day, spent_sol, updated_at) VALUES(?, ?, ?)
             ON CONFLICT(day) DO UPDATE SET
                 spent_sol = tips_ledger.spent_sol + excluded.spent_sol,
                 updated_at = excluded.updated_at",
        )
        .bind(day)
        .bind(sol)
        .bind(crate::types::now_ms() as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Origin, Snapshot};

    const MINT: &str = "GnQ1W2dKkJWBFFeyf3qbDvMLdTcgBvq5Yf2kZFxJdGe1";

    fn entry_row(status: &str, tier: Option<&str>, ts: u64) -> EntryOrderRow {
        EntryOrderRow {
            market: MINT.to_string(),
            mint: MINT.to_string(),
            origin: Origin::Pumpfun,
            status: status.to_string(),
            size_tier: tier.map(|t| t.to_string()),
            quantity_base: 0.1,
            decided_ts: ts,
            notes: None,
        }
    }

    #[tokio::test]
    async fn schema_version_is_recorded() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn token_upsert_bumps_seen_count() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let row = TokenUpsert {
            mint: MINT.to_string(),
            origin: Origin::Pumpfun,
            creator: None,
            name: None,
            symbol: None,
            ts: 1_000,
        };
        store.upsert_token(&row).await.unwrap();
        store
            .upsert_token(&TokenUpsert {
                ts: 2_000,
                creator: Some("creatorX".to_string()),
                ..row.clone()
            })
            .await
            .unwrap();

        let (first, last, seen, creator): (i64, i64, i64, Option<String>) = sqlx::query_as(
            "SELECT first_seen_ts, last_seen_ts, seen_count, creator FROM tokens WHERE mint = ?",
        )
        .bind(MINT)
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(first, 1_000);
        assert_eq!(last, 2_000);
        assert_eq!(seen, 2);
        assert_eq!(creator.as_deref(), Some("creatorX"));
    }

    #[tokio::test]
    async fn accept_row_is_never_overwritten_by_upsert() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert_unitary_entry(&entry_row("dry_run", Some("APEX"), 1_000))
            .await
            .unwrap();
        // Replaying a different accept (or a rejection) must not clobber it.
        store
            .upsert_unitary_entry(&entry_row("rejected_fatal", None, 2_000))
            .await
            .unwrap();
        let order = store.unitary_entry(MINT).await.unwrap().unwrap();
        assert_eq!(order.status, "dry_run");
        assert_eq!(order.size_tier.as_deref(), Some("APEX"));
        assert_eq!(order.decided_ts, Some(1_000));
    }

    #[tokio::test]
    async fn non_accept_row_is_overwritten_by_accept() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert_unitary_entry(&entry_row("rejected_fatal", None, 1_000))
            .await
            .unwrap();
        store
            .upsert_unitary_entry(&entry_row("dry_run", Some("SMALL"), 2_000))
            .await
            .unwrap();
        let order = store.unitary_entry(MINT).await.unwrap().unwrap();
        assert_eq!(order.status, "dry_run");
        assert_eq!(order.size_tier.as_deref(), Some("SMALL"));
    }

    #[tokio::test]
    async fn tier_upgrade_only_moves_small_to_apex() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert_unitary_entry(&entry_row("dry_run", Some("SMALL"), 1_000))
            .await
            .unwrap();
        store.upgrade_unitary_tier(MINT, "APEX", 2_000).await.unwrap();
        let order = store.unitary_entry(MINT).await.unwrap().unwrap();
        assert_eq!(order.size_tier.as_deref(), Some("APEX"));

        // A second upgrade call is a no-op: nothing is SMALL anymore.
        store.upgrade_unitary_tier(MINT, "APEX", 3_000).await.unwrap();
        let order = store.unitary_entry(MINT).await.unwrap().unwrap();
        assert_eq!(order.decided_ts, Some(2_000));
    }

    #[tokio::test]
    async fn events_and_quotes_round_trip() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let snapshot = Snapshot {
            buyers: 8,
            unique_funders: 6,
            same_funder_ratio: 0.3,
            price_jumps: 1,
            depth_est: 0.4,
            last_ts: 5_000,
        };
        store
            .insert_event(&EventRow {
                ts: 5_000,
                signature: Some("sig1".to_string()),
                mint: MINT.to_string(),
                origin: Origin::Pumpfun,
                creator: None,
                snapshot,
            })
            .await
            .unwrap();
        let buyers: i64 = sqlx::query_scalar("SELECT buyers FROM events WHERE mint = ?")
            .bind(MINT)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(buyers, 8);

        let quote = QuoteRow {
            ts: 5_000,
            mint: MINT.to_string(),
            origin: Origin::Pumpfun,
            route: "pump-curve".to_string(),
            size_sol: 0.1,
            est_fill_price_sol: Some(0.000001),
            est_slippage_bps: Some(35.0),
            reserves_json: None,
        };
        store.insert_quote(&quote).await.unwrap();
        // Same primary key is ignored, not an error.
        store.insert_quote(&quote).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotes")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn tip_budget_is_enforced() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.record_tip_spend("2026-08-02", 0.3, 0.5).await.unwrap());
        assert!(!store.record_tip_spend("2026-08-02", 0.3, 0.5).await.unwrap());
        assert!(store.record_tip_spend("2026-08-02", 0.2, 0.5).await.unwrap());
        let spent = store.tips_spent("2026-08-02").await.unwrap();
        assert!((spent - 0.5).abs() < 1e-9);
    }
}
