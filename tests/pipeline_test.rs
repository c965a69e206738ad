//! End-to-end pipeline tests: synthetic log batches in, decisions and
//! persisted rows out, against an in-memory store.

use mintwatch::alerts::Notifier;
use mintwatch::config::Config;
use mintwatch::pipeline::counters::FeedCounters;
use mintwatch::pipeline::entry::{DecisionLog, EntryEngine};
use mintwatch::pipeline::validator::MintValidator;
use mintwatch::pipeline::Pipeline;
use mintwatch::storage::{LedgerStore, SqliteStore};
use mintwatch::types::{Decision, LogBatch, Origin};
use std::sync::Arc;

const MINT: &str = "GnQ1W2dKkJWBFFeyf3qbDvMLdTcgBvq5Yf2kZFxJdGe1";

fn funder(i: usize) -> String {
    const TAGS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    let tag = TAGS[i % TAGS.len()] as char;
    format!("Fndr{tag}{}", "m".repeat(39))
}

/// Test configuration: deterministic (heat off, verification off, no
/// introspection), no cooldowns between evaluations.
fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.heat.enabled = false;
    cfg.mint_verify.mode = "off".parse().unwrap();
    cfg.tx_lookup.mode = "off".parse().unwrap();
    cfg.entry.reeval_cooldown_sec = 0;
    cfg.entry.accept_cooldown_sec = 0;
    cfg.cohort.wallets = vec![];
    cfg
}

struct Harness {
    pipeline: Pipeline,
    store: Arc<SqliteStore>,
    counters: FeedCounters,
    notifier: Arc<Notifier>,
}

async fn harness(cfg: Config) -> Harness {
    let cfg = Arc::new(cfg);
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let counters = FeedCounters::new(0);
    let notifier = Arc::new(Notifier::new(cfg.alerts.clone(), cfg.telegram.clone()));
    let validator = MintValidator::new(cfg.programs.all_ids(), None, 3600);
    let engine = EntryEngine::new(
        cfg.entry.clone(),
        cfg.sizes.clone(),
        cfg.cohort.clone(),
        cfg.dry_run,
        store.clone(),
        notifier.clone(),
        counters.clone(),
        DecisionLog::default(),
    );
    let pipeline = Pipeline::new(
        cfg.clone(),
        validator,
        engine,
        None,
        store.clone(),
        counters.clone(),
    );
    Harness {
        pipeline,
        store,
        counters,
        notifier,
    }
}

fn create_batch(sig: &str, ts: u64) -> LogBatch {
    LogBatch {
        origin: Origin::Pumpfun,
        program_id: "prog".to_string(),
        signature: sig.to_string(),
        logs: vec![
            "Program log: Instruction: CreateToken".to_string(),
            format!("Program log: mint: {MINT}"),
        ],
        ts,
    }
}

fn buy_batch(sig: &str, ts: u64, funder: &str, price: Option<&str>) -> LogBatch {
    let price_part = price.map(|p| format!(" price={p}")).unwrap_or_default();
    LogBatch {
        origin: Origin::Pumpfun,
        program_id: "prog".to_string(),
        signature: sig.to_string(),
        logs: vec![
            "Program log: Instruction: Buy".to_string(),
            format!("Program log: mint: {MINT} buyer: {funder}{price_part}"),
        ],
        ts,
    }
}

#[tokio::test]
async fn cold_start_create_holds_and_records_token() {
    let mut h = harness(test_config()).await;
    h.pipeline
        .process_batch(&create_batch("sig1", 1_000))
        .await
        .unwrap();

    let snap = h.pipeline.micro_snapshot(MINT);
    assert_eq!(snap.buyers, 1);
    assert_eq!(snap.unique_funders, 0);
    assert_eq!(
        h.pipeline.entry_engine().last_decision(MINT),
        Some(Decision::Hold)
    );
    assert!(h.store.unitary_entry(MINT).await.unwrap().is_none());

    let seen: i64 = sqlx::query_scalar("SELECT seen_count FROM tokens WHERE mint = ?")
        .bind(MINT)
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    assert_eq!(seen, 1);
}

#[tokio::test]
async fn accept_happy_path_reaches_apex() {
    let mut cfg = test_config();
    // Gate the observation window so the first passing snapshot is already
    // apex-grade.
    cfg.entry.min_obs_buyers = 8;
    cfg.entry.min_obs_unique = 6;
    let mut h = harness(cfg).await;

    for i in 1..=8u64 {
        // One 20% price move partway through gives one price jump.
        let price = match i {
            4 => Some("1.0"),
            5 => Some("1.2"),
            _ => None,
        };
        h.pipeline
            .process_batch(&buy_batch(
                &format!("sig{i}"),
                1_000 + i * 500,
                &funder(i as usize),
                price,
            ))
            .await
            .unwrap();
    }

    let snap = h.pipeline.micro_snapshot(MINT);
    assert_eq!(snap.buyers, 8);
    assert_eq!(snap.unique_funders, 8);
    assert_eq!(snap.price_jumps, 1);
    assert!((snap.depth_est - 0.4).abs() < 1e-9);

    assert_eq!(
        h.pipeline.entry_engine().last_decision(MINT),
        Some(Decision::AcceptedApex)
    );
    let order = h.store.unitary_entry(MINT).await.unwrap().unwrap();
    assert_eq!(order.status, "dry_run");
    assert_eq!(order.size_tier.as_deref(), Some("APEX"));

    let counters = h.counters.snapshot().await;
    assert_eq!(counters.accepts_24h, 1, "one heat tick / one accept");
    assert!(h.notifier.meta().await.sent_total >= 1, "one alert emitted");
}

#[tokio::test]
async fn fatal_concentration_is_sticky() {
    let mut h = harness(test_config()).await;

    // Thirteen buys from one funder, then four fresh funders: the first
    // snapshot past the observation gate carries ratio 13/17 > 0.75.
    let whale = funder(0);
    let mut ts = 1_000u64;
    for i in 1..=13u64 {
        h.pipeline
            .process_batch(&buy_batch(&format!("w{i}"), ts, &whale, None))
            .await
            .unwrap();
        ts += 200;
    }
    for i in 1..=4usize {
        h.pipeline
            .process_batch(&buy_batch(&format!("f{i}"), ts, &funder(i), None))
            .await
            .unwrap();
        ts += 200;
    }

    assert!(h.pipeline.entry_engine().is_sticky_fatal(MINT));
    let order = h.store.unitary_entry(MINT).await.unwrap().unwrap();
    assert_eq!(order.status, "rejected_fatal");
    assert_eq!(h.counters.snapshot().await.rejects_24h, 1);

    // A burst of clean flow afterwards must change nothing.
    for i in 5..=12usize {
        h.pipeline
            .process_batch(&buy_batch(&format!("g{i}"), ts, &funder(i), None))
            .await
            .unwrap();
        ts += 200;
    }
    assert_eq!(
        h.pipeline.entry_engine().last_decision(MINT),
        Some(Decision::RejectedFatal)
    );
    let order = h.store.unitary_entry(MINT).await.unwrap().unwrap();
    assert_eq!(order.status, "rejected_fatal");
    assert_eq!(h.counters.snapshot().await.accepts_24h, 0);
}

#[tokio::test]
async fn small_then_apex_upgrades_single_row() {
    let mut h = harness(test_config()).await;

    // Six distinct funders at depth 0.3 with one price jump:
    // 20 + 20 + 10 + 10 = 60 -> SMALL at the defaults.
    for i in 1..=6u64 {
        let price = match i {
            4 => Some("1.0"),
            5 => Some("1.2"),
            _ => None,
        };
        h.pipeline
            .process_batch(&buy_batch(
                &format!("s{i}"),
                1_000 + i * 500,
                &funder(i as usize),
                price,
            ))
            .await
            .unwrap();
    }
    assert_eq!(
        h.pipeline.entry_engine().last_decision(MINT),
        Some(Decision::AcceptedSmall)
    );
    let accepts_after_small = h.counters.snapshot().await.accepts_24h;
    assert_eq!(accepts_after_small, 1);

    // Two minutes later the flow broadens to apex grade.
    let later = 1_000 + 6 * 500 + 120_000;
    for i in 7..=8u64 {
        h.pipeline
            .process_batch(&buy_batch(
                &format!("s{i}"),
                later + i * 500,
                &funder(i as usize),
                None,
            ))
            .await
            .unwrap();
    }
    assert_eq!(
        h.pipeline.entry_engine().last_decision(MINT),
        Some(Decision::AcceptedApex)
    );
    let order = h.store.unitary_entry(MINT).await.unwrap().unwrap();
    assert_eq!(order.size_tier.as_deref(), Some("APEX"));
    assert_eq!(order.status, "dry_run");

    // Still a single order row and a single heat tick.
    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM orders WHERE market = ? AND type = 'unitary-entry'",
    )
    .bind(MINT)
    .fetch_one(h.store.pool())
    .await
    .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(h.counters.snapshot().await.accepts_24h, 1);
}

#[tokio::test]
async fn hold_ttl_expires_to_soft_reject() {
    let mut cfg = test_config();
    cfg.entry.hold_ttl_sec = 10;
    let mut h = harness(cfg).await;

    h.pipeline
        .process_batch(&buy_batch("h1", 1_000, &funder(1), None))
        .await
        .unwrap();
    assert_eq!(
        h.pipeline.entry_engine().last_decision(MINT),
        Some(Decision::Hold)
    );

    h.pipeline
        .process_batch(&buy_batch("h2", 12_500, &funder(1), None))
        .await
        .unwrap();
    assert_eq!(
        h.pipeline.entry_engine().last_decision(MINT),
        Some(Decision::RejectedSoft)
    );
    assert_eq!(h.counters.snapshot().await.soft_24h, 1);
    assert!(h.store.unitary_entry(MINT).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_signatures_are_dropped() {
    let mut h = harness(test_config()).await;
    h.pipeline
        .process_batch(&buy_batch("dup", 1_000, &funder(1), None))
        .await
        .unwrap();
    h.pipeline
        .process_batch(&buy_batch("dup", 2_000, &funder(2), None))
        .await
        .unwrap();

    assert_eq!(h.pipeline.micro_snapshot(MINT).buyers, 1);
    assert_eq!(h.counters.snapshot().await.dup_dropped, 1);

    // Past the 60s dedup window the same signature counts again.
    h.pipeline
        .process_batch(&buy_batch("dup", 65_000, &funder(2), None))
        .await
        .unwrap();
    assert_eq!(h.pipeline.micro_snapshot(MINT).buyers, 2);
}

#[tokio::test]
async fn replay_is_idempotent() {
    let mut cfg = test_config();
    cfg.entry.min_obs_buyers = 8;
    cfg.entry.min_obs_unique = 6;
    let mut h = harness(cfg).await;

    let batches: Vec<LogBatch> = (1..=8u64)
        .map(|i| {
            buy_batch(
                &format!("r{i}"),
                1_000 + i * 500,
                &funder(i as usize),
                (i == 5).then_some("1.2"),
            )
        })
        .collect();
    for b in &batches {
        h.pipeline.process_batch(b).await.unwrap();
    }
    let order_before = h.store.unitary_entry(MINT).await.unwrap().unwrap();

    // Replaying the same batches changes nothing: dedup eats them.
    for b in &batches {
        h.pipeline.process_batch(b).await.unwrap();
    }
    let order_after = h.store.unitary_entry(MINT).await.unwrap().unwrap();
    assert_eq!(order_before.status, order_after.status);
    assert_eq!(order_before.size_tier, order_after.size_tier);
    assert_eq!(order_before.decided_ts, order_after.decided_ts);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(h.counters.snapshot().await.accepts_24h, 1);
}

#[tokio::test]
async fn program_id_as_mint_never_enters_the_pipeline() {
    let cfg = test_config();
    let program_id = cfg.programs.pumpfun[0].clone();
    let mut h = harness(cfg).await;

    let batch = LogBatch {
        origin: Origin::Pumpfun,
        program_id: program_id.clone(),
        signature: "p1".to_string(),
        logs: vec![format!("Program log: Instruction: Buy mint: {program_id}")],
        ts: 1_000,
    };
    h.pipeline.process_batch(&batch).await.unwrap();

    assert_eq!(h.pipeline.micro_snapshot(&program_id).buyers, 0);
    assert_eq!(h.counters.snapshot().await.parse_miss, 1);
    let tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tokens")
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    assert_eq!(tokens, 0);
}

#[tokio::test]
async fn changed_snapshots_are_persisted_as_events() {
    let mut h = harness(test_config()).await;
    for i in 1..=5u64 {
        h.pipeline
            .process_batch(&buy_batch(
                &format!("e{i}"),
                1_000 + i * 100,
                &funder(i as usize),
                None,
            ))
            .await
            .unwrap();
    }
    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE mint = ?")
        .bind(MINT)
        .fetch_one(h.store.pool())
        .await
        .unwrap();
    // Buyer count moves on every batch, so every snapshot emits.
    assert_eq!(events, 5);
}

#[tokio::test]
async fn housekeeping_expires_microstructure() {
    let mut h = harness(test_config()).await;
    h.pipeline
        .process_batch(&buy_batch("x1", 1_000, &funder(1), None))
        .await
        .unwrap();
    assert_eq!(h.pipeline.micro_snapshot(MINT).buyers, 1);

    // Two minutes on, the state is evicted.
    h.pipeline.housekeeping(1_000 + 121_000).await;
    assert_eq!(h.pipeline.micro_snapshot(MINT).buyers, 0);
}
