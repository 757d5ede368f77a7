//! Trace store: the durable system of record for every firing decision.
//!
//! One row per (bot_id, trace) in `bot_traces`, with independent JSONB
//! sections written idempotently via `ON CONFLICT DO UPDATE` — the engine
//! writes the initial decision concurrently with dispatch and again after
//! finalization, so every section write must be safe to repeat. Flat
//! `decisions` / `trades` / `fills` tables are written alongside for
//! backward-compatible read queries.
//!
//! Persistence is never load-bearing for trading: writes are retried inline
//! and spill into a bounded in-memory queue when the store is unreachable;
//! whatever is still queued at process exit is lost by design.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::models::{TraceId, Venue};

/// Inline attempts per write before it is parked in the overflow queue.
const WRITE_ATTEMPTS: usize = 2;

/// Parked writes beyond this are dropped oldest-first.
const OVERFLOW_CAP: usize = 512;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS bot_traces (
    bot_id TEXT NOT NULL,
    trace TEXT NOT NULL,
    bot_configs JSONB,
    decision_data JSONB,
    decision_ob_v1 JSONB,
    decision_ob_v2 JSONB,
    trade_v1 JSONB,
    trade_v2 JSONB,
    fill_v1 JSONB,
    fill_v2 JSONB,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (bot_id, trace)
);

CREATE TABLE IF NOT EXISTS decisions (
    trace TEXT PRIMARY KEY,
    ts TIMESTAMPTZ NOT NULL,
    bot_name TEXT NOT NULL,
    ob_v1 TEXT,
    ob_v2 TEXT,
    inv_before TEXT,
    inv_after TEXT,
    reason TEXT,
    direction TEXT,
    spread_signal DOUBLE PRECISION,
    size DOUBLE PRECISION
);

CREATE TABLE IF NOT EXISTS trades (
    id BIGSERIAL PRIMARY KEY,
    trace TEXT NOT NULL,
    ts TIMESTAMPTZ NOT NULL,
    bot_name TEXT NOT NULL,
    venue TEXT NOT NULL,
    size DOUBLE PRECISION,
    ob_price DOUBLE PRECISION,
    exec_price DOUBLE PRECISION,
    lat_order DOUBLE PRECISION,
    reason TEXT,
    direction TEXT,
    status TEXT,
    payload TEXT,
    resp TEXT
);

CREATE TABLE IF NOT EXISTS fills (
    id BIGSERIAL PRIMARY KEY,
    trace TEXT NOT NULL,
    ts TIMESTAMPTZ NOT NULL,
    bot_name TEXT NOT NULL,
    venue TEXT NOT NULL,
    base_amount DOUBLE PRECISION,
    fill_price DOUBLE PRECISION,
    latency DOUBLE PRECISION
);
"#;

/// The JSONB sections of a `bot_traces` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSection {
    BotConfigs,
    DecisionData,
    DecisionObV1,
    DecisionObV2,
    TradeV1,
    TradeV2,
    FillV1,
    FillV2,
}

impl TraceSection {
    pub fn column(&self) -> &'static str {
        match self {
            TraceSection::BotConfigs => "bot_configs",
            TraceSection::DecisionData => "decision_data",
            TraceSection::DecisionObV1 => "decision_ob_v1",
            TraceSection::DecisionObV2 => "decision_ob_v2",
            TraceSection::TradeV1 => "trade_v1",
            TraceSection::TradeV2 => "trade_v2",
            TraceSection::FillV1 => "fill_v1",
            TraceSection::FillV2 => "fill_v2",
        }
    }

    pub fn trade_for(venue: Venue) -> Self {
        match venue {
            Venue::V1 => TraceSection::TradeV1,
            Venue::V2 => TraceSection::TradeV2,
        }
    }

    pub fn fill_for(venue: Venue) -> Self {
        match venue {
            Venue::V1 => TraceSection::FillV1,
            Venue::V2 => TraceSection::FillV2,
        }
    }
}

/// Flat `decisions`-table shape written alongside the trace sections.
#[derive(Debug, Clone)]
pub struct DecisionRow {
    pub ts: DateTime<Utc>,
    pub ob_v1: String,
    pub ob_v2: String,
    pub inv_before: String,
    pub inv_after: Option<String>,
    pub reason: String,
    pub direction: String,
    pub spread_signal: Option<f64>,
    pub size: Option<f64>,
}

#[derive(Debug, Clone)]
enum TraceWrite {
    Sections {
        trace: String,
        sections: Vec<(TraceSection, Value)>,
    },
    DecisionRow {
        trace: String,
        row: DecisionRow,
    },
    TradeRow {
        trace: String,
        ts: DateTime<Utc>,
        venue: Venue,
        size: f64,
        ob_price: f64,
        exec_price: f64,
        lat_order_ms: Option<f64>,
        reason: String,
        direction: String,
        status: String,
        payload: Option<String>,
        resp: Option<String>,
    },
    FillRow {
        trace: String,
        ts: DateTime<Utc>,
        venue: Venue,
        base_amount: Option<f64>,
        fill_price: Option<f64>,
        latency_ms: Option<f64>,
    },
}

pub struct TraceWriter {
    dsn: Option<String>,
    bot_id: String,
    pool: OnceCell<PgPool>,
    overflow: Mutex<VecDeque<TraceWrite>>,
    no_dsn_warned: AtomicBool,
}

impl TraceWriter {
    pub fn new(dsn: Option<String>, bot_id: impl Into<String>) -> Self {
        TraceWriter {
            dsn,
            bot_id: bot_id.into(),
            pool: OnceCell::new(),
            overflow: Mutex::new(VecDeque::new()),
            no_dsn_warned: AtomicBool::new(false),
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    /// Upsert the initial (and final) decision record: config echo, decision
    /// payload and both decision-time books, plus the flat `decisions` row.
    pub async fn init_or_update_decision(
        &self,
        trace: &TraceId,
        configs: Value,
        decision_data: Value,
        ob_v1: Value,
        ob_v2: Value,
        flat: DecisionRow,
    ) {
        self.submit(TraceWrite::Sections {
            trace: trace.as_str().to_string(),
            sections: vec![
                (TraceSection::BotConfigs, configs),
                (TraceSection::DecisionData, decision_data),
                (TraceSection::DecisionObV1, ob_v1),
                (TraceSection::DecisionObV2, ob_v2),
            ],
        })
        .await;
        self.submit(TraceWrite::DecisionRow {
            trace: trace.as_str().to_string(),
            row: flat,
        })
        .await;
    }

    /// Patch a single JSONB section of the trace row.
    pub async fn upsert_section(&self, trace: &TraceId, section: TraceSection, payload: Value) {
        self.submit(TraceWrite::Sections {
            trace: trace.as_str().to_string(),
            sections: vec![(section, payload)],
        })
        .await;
    }

    /// Record one leg submission, OK or ERROR, in both shapes.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_trade_row(
        &self,
        trace: &TraceId,
        ts: DateTime<Utc>,
        venue: Venue,
        size: f64,
        ob_price: f64,
        exec_price: f64,
        lat_order_ms: Option<f64>,
        reason: &str,
        direction: &str,
        status: &str,
        payload: Option<String>,
        resp: Option<String>,
    ) {
        let section_payload = serde_json::json!({
            "trace": trace.as_str(),
            "ts": ts.to_rfc3339(),
            "venue": venue.as_str(),
            "size": size,
            "ob_price": ob_price,
            "exec_price": exec_price,
            "lat_order_ms": lat_order_ms,
            "reason": reason,
            "direction": direction,
            "status": status,
            "payload": payload,
            "resp": resp,
        });
        self.upsert_section(trace, TraceSection::trade_for(venue), section_payload)
            .await;
        self.submit(TraceWrite::TradeRow {
            trace: trace.as_str().to_string(),
            ts,
            venue,
            size,
            ob_price,
            exec_price,
            lat_order_ms,
            reason: reason.to_string(),
            direction: direction.to_string(),
            status: status.to_string(),
            payload,
            resp,
        })
        .await;
    }

    /// Record one reconciled fill in both shapes.
    pub async fn insert_fill_row(
        &self,
        trace: &TraceId,
        ts: DateTime<Utc>,
        venue: Venue,
        base_amount: Option<f64>,
        fill_price: Option<f64>,
        latency_ms: Option<f64>,
    ) {
        let section_payload = serde_json::json!({
            "trace": trace.as_str(),
            "ts": ts.to_rfc3339(),
            "venue": venue.as_str(),
            "base_amount": base_amount,
            "fill_price": fill_price,
            "latency_ms": latency_ms,
        });
        self.upsert_section(trace, TraceSection::fill_for(venue), section_payload)
            .await;
        self.submit(TraceWrite::FillRow {
            trace: trace.as_str().to_string(),
            ts,
            venue,
            base_amount,
            fill_price,
            latency_ms,
        })
        .await;
    }

    /// Writes parked while the store was unreachable.
    pub async fn queued_writes(&self) -> usize {
        self.overflow.lock().await.len()
    }

    // -------------------------------------------------------------------------
    // internals
    // -------------------------------------------------------------------------

    async fn submit(&self, write: TraceWrite) {
        if self.dsn.is_none() {
            if !self.no_dsn_warned.swap(true, Ordering::Relaxed) {
                warn!("[TRACE] DATABASE_URL not set; trace persistence disabled");
            }
            return;
        }
        let pool = match self.get_pool().await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "[TRACE] store unreachable; parking write");
                self.park(write).await;
                return;
            }
        };

        self.drain_overflow(&pool).await;

        match self.execute_with_retry(&pool, &write).await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "[TRACE] write failed; parking");
                self.park(write).await;
            }
        }
    }

    async fn get_pool(&self) -> Result<PgPool> {
        let dsn = self.dsn.as_deref().unwrap_or_default();
        let pool = self
            .pool
            .get_or_try_init(|| async {
                let pool = PgPoolOptions::new()
                    .min_connections(1)
                    .max_connections(4)
                    .acquire_timeout(std::time::Duration::from_secs(5))
                    .connect(dsn)
                    .await
                    .context("connecting trace store")?;
                sqlx::raw_sql(SCHEMA_SQL)
                    .execute(&pool)
                    .await
                    .context("ensuring trace schema")?;
                info!("[TRACE] store connected, schema ensured");
                Ok::<PgPool, anyhow::Error>(pool)
            })
            .await?;
        Ok(pool.clone())
    }

    async fn park(&self, write: TraceWrite) {
        let mut q = self.overflow.lock().await;
        if q.len() >= OVERFLOW_CAP {
            q.pop_front();
            warn!("[TRACE] overflow queue full; dropping oldest write");
        }
        q.push_back(write);
    }

    async fn drain_overflow(&self, pool: &PgPool) {
        loop {
            let next = {
                let mut q = self.overflow.lock().await;
                q.pop_front()
            };
            let Some(write) = next else { return };
            if let Err(e) = self.execute(pool, &write).await {
                debug!(error = %e, "[TRACE] overflow drain stalled");
                self.overflow.lock().await.push_front(write);
                return;
            }
        }
    }

    async fn execute_with_retry(&self, pool: &PgPool, write: &TraceWrite) -> Result<()> {
        let mut last = None;
        for attempt in 0..WRITE_ATTEMPTS {
            match self.execute(pool, write).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last = Some(e);
                    if attempt + 1 < WRITE_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| anyhow::anyhow!("trace write failed")))
    }

    async fn execute(&self, pool: &PgPool, write: &TraceWrite) -> Result<()> {
        match write {
            TraceWrite::Sections { trace, sections } => {
                for (section, payload) in sections {
                    let col = section.column();
                    let sql = format!(
                        "INSERT INTO bot_traces (bot_id, trace, {col}, updated_at) \
                         VALUES ($1, $2, $3::jsonb, now()) \
                         ON CONFLICT (bot_id, trace) \
                         DO UPDATE SET {col} = EXCLUDED.{col}, updated_at = now()"
                    );
                    sqlx::query(&sql)
                        .bind(&self.bot_id)
                        .bind(trace)
                        .bind(payload.to_string())
                        .execute(pool)
                        .await
                        .with_context(|| format!("upserting section {col}"))?;
                }
                Ok(())
            }
            TraceWrite::DecisionRow { trace, row } => {
                sqlx::query(
                    "INSERT INTO decisions \
                     (trace, ts, bot_name, ob_v1, ob_v2, inv_before, inv_after, \
                      reason, direction, spread_signal, size) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     ON CONFLICT (trace) DO UPDATE SET \
                       ob_v1 = EXCLUDED.ob_v1, \
                       ob_v2 = EXCLUDED.ob_v2, \
                       inv_before = EXCLUDED.inv_before, \
                       inv_after = EXCLUDED.inv_after, \
                       reason = EXCLUDED.reason, \
                       direction = EXCLUDED.direction, \
                       spread_signal = EXCLUDED.spread_signal, \
                       size = EXCLUDED.size, \
                       ts = EXCLUDED.ts, \
                       bot_name = EXCLUDED.bot_name",
                )
                .bind(trace)
                .bind(row.ts)
                .bind(&self.bot_id)
                .bind(&row.ob_v1)
                .bind(&row.ob_v2)
                .bind(&row.inv_before)
                .bind(&row.inv_after)
                .bind(&row.reason)
                .bind(&row.direction)
                .bind(row.spread_signal)
                .bind(row.size)
                .execute(pool)
                .await
                .context("upserting decision row")?;
                Ok(())
            }
            TraceWrite::TradeRow {
                trace,
                ts,
                venue,
                size,
                ob_price,
                exec_price,
                lat_order_ms,
                reason,
                direction,
                status,
                payload,
                resp,
            } => {
                sqlx::query(
                    "INSERT INTO trades \
                     (trace, ts, bot_name, venue, size, ob_price, exec_price, \
                      lat_order, reason, direction, status, payload, resp) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                )
                .bind(trace)
                .bind(ts)
                .bind(&self.bot_id)
                .bind(venue.as_str())
                .bind(size)
                .bind(ob_price)
                .bind(exec_price)
                .bind(lat_order_ms)
                .bind(reason)
                .bind(direction)
                .bind(status)
                .bind(payload)
                .bind(resp)
                .execute(pool)
                .await
                .context("inserting trade row")?;
                Ok(())
            }
            TraceWrite::FillRow {
                trace,
                ts,
                venue,
                base_amount,
                fill_price,
                latency_ms,
            } => {
                sqlx::query(
                    "INSERT INTO fills \
                     (trace, ts, bot_name, venue, base_amount, fill_price, latency) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(trace)
                .bind(ts)
                .bind(&self.bot_id)
                .bind(venue.as_str())
                .bind(base_amount)
                .bind(fill_price)
                .bind(latency_ms)
                .execute(pool)
                .await
                .context("inserting fill row")?;
                Ok(())
            }
        }
    }
}
