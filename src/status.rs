//! Read-only HTTP status endpoint.
//!
//! `GET /health` answers a liveness probe; `GET /status` aggregates the
//! schema version, position and PnL figures, feed counters, decision
//! stats, microstructure summary and alert metadata into one JSON
//! document.

use crate::alerts::Notifier;
use crate::pipeline::counters::FeedCounters;
use crate::pipeline::entry::DecisionLog;
use crate::pipeline::MicroSummary;
use crate::storage::LedgerStore;
use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

pub struct StatusServer {
    pub port: u16,
    pub store: Arc<dyn LedgerStore>,
    pub counters: FeedCounters,
    pub decision_log: DecisionLog,
    pub summary: Arc<RwLock<MicroSummary>>,
    pub notifier: Arc<Notifier>,
    pub subscribed_programs: usize,
}

impl StatusServer {
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let ctx = Arc::new(self);
        let make_svc = make_service_fn(move |_| {
            let ctx = ctx.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let ctx = ctx.clone();
                    async move { Ok::<_, Infallible>(handle(ctx, req).await) }
                }))
            }
        });
        info!(%addr, "status endpoint listening");
        Server::bind(&addr).serve(make_svc).await?;
        Ok(())
    }
}

async fn handle(ctx: Arc<StatusServer>, req: Request<Body>) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => json_response(
            StatusCode::OK,
            json!({ "ok": true, "version": 1 }),
        ),
        (&Method::GET, "/status") => match build_status(&ctx).await {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => {
                error!(error = %e, "status aggregation failed");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": e.to_string() }),
                )
            }
        },
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    }
}

fn json_response(code: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(code)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

async fn build_status(ctx: &StatusServer) -> Result<serde_json::Value> {
    let schema_version = ctx.store.schema_version().await?;
    let open_positions = ctx.store.open_positions_count().await?;
    let midnight_ms = chrono::Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis() as u64)
        .unwrap_or(0);
    let pnl_today = ctx.store.realized_pnl_since(midnight_ms).await?;
    let halts = ctx.store.active_halts().await?;
    let counters = ctx.counters.snapshot().await;
    let (last_decisions, last_accepted) = ctx.decision_log.recent().await;
    let summary = ctx.summary.read().await.clone();
    let alerts = ctx.notifier.meta().await;

    Ok(json!({
        "schema_version": schema_version,
        "open_positions": open_positions,
        "realized_pnl_today_sol": pnl_today,
        "active_halts": halts
            .iter()
            .map(|h| json!({ "market": h.market, "reason": h.reason, "created_at": h.created_at }))
            .collect::<Vec<_>>(),
        "feed": {
            "subscribed_programs": ctx.subscribed_programs,
            "events_total": counters.events_total,
            "per_origin": counters.per_origin,
            "last_event_ts": counters.last_event_ts,
            "parse_miss": counters.parse_miss,
            "invalid_mint": counters.invalid_mint,
            "dup_dropped": counters.dup_dropped,
            "tx_fetch_errors": counters.tx_fetch_errors,
            "rate_capped": counters.rate_capped,
            "ws_errors": counters.ws_errors,
            "reconnects": counters.reconnects,
        },
        "decisions": {
            "accepts_24h": counters.accepts_24h,
            "rejects_24h": counters.rejects_24h,
            "soft_24h": counters.soft_24h,
            "pending_24h": counters.pending_24h,
            "last_decisions": last_decisions,
            "last_accepted": last_accepted,
        },
        "microstructure": {
            "tracked_mints": summary.tracked_mints,
            "evicted_total": summary.evicted_total,
            "heat_band": summary.heat_band,
            "accepts_per_hour": summary.accepts_per_hour,
        },
        "alerts": alerts,
    }))
}
