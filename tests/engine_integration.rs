//! End-to-end engine tests over in-process paper venues.
//!
//! Every scenario drives a real engine task through its event channel:
//! books, account fills and position snapshots arrive exactly like they
//! would from live adapters, and assertions run on the engine state after a
//! drain-and-stop shutdown so there is no sleeping or polling.

use std::sync::Arc;

use basisbot::config::PairConfig;
use basisbot::engine::state::WarmupStage;
use basisbot::engine::Engine;
use basisbot::models::{Direction, ReasonTag, Side, TraceId, Venue};
use basisbot::trace::{DecisionRow, TraceWriter};
use basisbot::venues::paper::PaperVenue;
use basisbot::venues::VenueMeta;

fn meta(name: &str) -> VenueMeta {
    VenueMeta {
        name: name.to_string(),
        min_size: 0.001,
        min_notional: 0.0,
        size_step: 0.001,
        price_step: 0.1,
        size_decimals: 3,
        price_decimals: 1,
    }
}

fn pair_config() -> PairConfig {
    PairConfig {
        sym_v1: "MEGA".to_string(),
        sym_v2: "MEGA-USD".to_string(),
        venue1: "paper".to_string(),
        venue2: "paper".to_string(),
        min_spread: 0.40,
        spread_tp: 0.20,
        min_hits: 3,
        max_position_value: None,
        max_trade_value: None,
        max_of_ob: 0.30,
        max_trades: None,
        dedup_ob: false,
        warm_up_orders: false,
        slippage: 0.04,
    }
}

struct Rig {
    v1: Arc<PaperVenue>,
    v2: Arc<PaperVenue>,
    handle: tokio::task::JoinHandle<Engine>,
}

async fn start(cfg: PairConfig, pos_v1: (f64, f64), pos_v2: (f64, f64)) -> Rig {
    let v1 = PaperVenue::with_options(meta("alpha"), pos_v1, false, None);
    let v2 = PaperVenue::with_options(meta("beta"), pos_v2, false, None);
    let writer = Arc::new(TraceWriter::new(None, cfg.bot_id()));
    let mut engine = Engine::new(cfg, v1.clone(), v2.clone(), writer).unwrap();
    let handle = tokio::spawn(async move {
        engine.run().await.unwrap();
        engine
    });
    v1.wait_subscribed().await;
    v2.wait_subscribed().await;
    Rig { v1, v2, handle }
}

impl Rig {
    /// Drain everything queued so far, stop the engine, hand it back.
    async fn stop(self) -> Engine {
        self.v1.push_shutdown().await.unwrap();
        self.handle.await.unwrap()
    }
}

/// Push the S1 book sequence: three consecutive TT_12 hits above 0.40%.
async fn push_entry_sequence(rig: &Rig) {
    rig.v1.push_book_prices(100.0, 1.0, 100.1, 0.5).await.unwrap();
    rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
    rig.v2.push_book_prices(100.55, 0.4, 100.65, 1.0).await.unwrap();
    rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
}

#[tokio::test]
async fn entry_fires_after_three_consecutive_hits() {
    let rig = start(pair_config(), (0.0, 0.0), (0.0, 0.0)).await;
    push_entry_sequence(&rig).await;
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    let v1_orders = v1.orders();
    let v2_orders = v2.orders();
    assert_eq!(v1_orders.len(), 1);
    assert_eq!(v2_orders.len(), 1);

    // long the cheap venue at ask × (1 + slippage)
    assert_eq!(v1_orders[0].side, Side::Long);
    assert!((v1_orders[0].size - 0.120).abs() < 1e-9);
    assert!((v1_orders[0].ref_price - 100.1 * 1.04).abs() < 1e-9);
    // short the rich venue at bid × (1 − slippage)
    assert_eq!(v2_orders[0].side, Side::Short);
    assert!((v2_orders[0].size - 0.120).abs() < 1e-9);
    assert!((v2_orders[0].ref_price - 100.6 * 0.96).abs() < 1e-9);

    let state = engine.state();
    let ctx = state.trade_ctx.as_ref().unwrap();
    assert_eq!(ctx.reason, ReasonTag::Tt12);
    assert_eq!(ctx.direction, Direction::Entry);
    let pending = state.pending.as_ref().unwrap();
    assert!(!pending.settled());
    assert!((pending.remaining(Venue::V1) - 0.120).abs() < 1e-9);
    assert!((pending.remaining(Venue::V2) + 0.120).abs() < 1e-9);
}

#[tokio::test]
async fn broken_hit_run_blocks_the_entry() {
    let rig = start(pair_config(), (0.0, 0.0), (0.0, 0.0)).await;
    rig.v1.push_book_prices(100.0, 1.0, 100.1, 0.5).await.unwrap();
    rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
    // dips below min_spread: 0.2997%
    rig.v2.push_book_prices(100.40, 0.4, 100.50, 1.0).await.unwrap();
    rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    assert!(v1.orders().is_empty());
    assert!(v2.orders().is_empty());
    // the rebound counts as hit #1, not #3
    assert_eq!(engine.state().tt12_hits, 1);
    assert!(engine.state().pending.is_none());
}

#[tokio::test]
async fn exit_fires_from_held_inventory() {
    let rig = start(pair_config(), (0.120, 100.1), (-0.120, 100.6)).await;
    rig.v1.push_book_prices(100.9, 0.5, 101.0, 1.0).await.unwrap();
    for _ in 0..3 {
        // tt_21 = (100.9 − 100.1) / 100.1 = 0.7992% > spread_tp
        rig.v2.push_book_prices(100.0, 1.0, 100.1, 0.4).await.unwrap();
    }
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    let v2_orders = v2.orders();
    let v1_orders = v1.orders();
    assert_eq!(v2_orders.len(), 1);
    assert_eq!(v2_orders[0].side, Side::Long);
    assert!((v2_orders[0].size - 0.120).abs() < 1e-9);
    assert_eq!(v1_orders.len(), 1);
    assert_eq!(v1_orders[0].side, Side::Short);

    let ctx = engine.state().trade_ctx.as_ref().unwrap();
    assert_eq!(ctx.reason, ReasonTag::Tt21);
    assert_eq!(ctx.direction, Direction::Exit);
}

#[tokio::test]
async fn exposure_cap_blocks_entries_but_lets_exits_through() {
    let mut cfg = pair_config();
    cfg.min_hits = 1;
    cfg.max_position_value = Some(10.0);
    // |0.12 × 100.0| = 12 ≥ 10: cap reached
    let rig = start(cfg, (0.120, 100.0), (-0.120, 100.6)).await;

    rig.v1.push_book_prices(100.0, 1.0, 100.1, 1.0).await.unwrap();
    // hot entry spread, would scale in without the cap
    rig.v2.push_book_prices(100.60, 1.0, 100.70, 1.0).await.unwrap();
    // inverse spread above take-profit: exit allowed despite the cap
    rig.v2.push_book_prices(99.60, 1.0, 99.70, 1.0).await.unwrap();
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    // the only orders are the exit pair: short V1 / long V2
    let v1_orders = v1.orders();
    let v2_orders = v2.orders();
    assert_eq!(v1_orders.len(), 1);
    assert_eq!(v1_orders[0].side, Side::Short);
    assert_eq!(v2_orders.len(), 1);
    assert_eq!(v2_orders[0].side, Side::Long);
    assert_eq!(
        engine.state().trade_ctx.as_ref().unwrap().direction,
        Direction::Exit
    );
}

#[tokio::test]
async fn fill_reconciliation_closes_the_trade() {
    let rig = start(pair_config(), (0.0, 0.0), (0.0, 0.0)).await;
    push_entry_sequence(&rig).await;

    // account deltas arrive in either order
    rig.v2.push_fill(-0.120, Some(100.576)).await.unwrap();
    rig.v1.push_fill(0.120, Some(100.140)).await.unwrap();
    // fresh snapshots release the position-sync gate
    rig.v1.push_position(0.120, 100.140).await.unwrap();
    rig.v2.push_position(-0.120, 100.576).await.unwrap();
    let engine = rig.stop().await;

    let state = engine.state();
    assert!(state.pending.is_none());
    assert!(state.trade_ctx.is_none());
    assert!((state.v1.inv_qty - 0.120).abs() < 1e-9);
    assert!((state.v1.entry_price - 100.140).abs() < 1e-9);
    assert!((state.v2.inv_qty + 0.120).abs() < 1e-9);
    assert!((state.v2.entry_price - 100.576).abs() < 1e-9);
}

#[tokio::test]
async fn oversized_fill_is_clamped_to_the_pending_remainder() {
    let rig = start(pair_config(), (0.0, 0.0), (0.0, 0.0)).await;
    push_entry_sequence(&rig).await;

    // double-size delta: clamped to the 0.120 the engine is waiting for
    rig.v1.push_fill(0.240, Some(100.140)).await.unwrap();
    rig.v2.push_fill(-0.120, Some(100.576)).await.unwrap();
    rig.v1.push_position(0.120, 100.140).await.unwrap();
    rig.v2.push_position(-0.120, 100.576).await.unwrap();
    let engine = rig.stop().await;

    let state = engine.state();
    assert!((state.v1.inv_qty - 0.120).abs() < 1e-9);
    assert!(state.pending.is_none());
    assert!(state.trade_ctx.is_none());
}

#[tokio::test]
async fn no_new_decisions_while_a_trade_is_in_flight() {
    let rig = start(pair_config(), (0.0, 0.0), (0.0, 0.0)).await;
    push_entry_sequence(&rig).await;
    // the spread stays hot but both legs are still unfilled
    for _ in 0..5 {
        rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
    }
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    assert_eq!(v1.orders().len(), 1);
    assert_eq!(v2.orders().len(), 1);
    assert!(engine.state().pending.is_some());
}

#[tokio::test]
async fn inventory_round_trips_through_entry_and_exit() {
    let mut cfg = pair_config();
    cfg.min_hits = 3;
    let rig = start(cfg, (0.0, 0.0), (0.0, 0.0)).await;

    push_entry_sequence(&rig).await;
    rig.v1.push_fill(0.120, Some(100.140)).await.unwrap();
    rig.v2.push_fill(-0.120, Some(100.576)).await.unwrap();
    rig.v1.push_position(0.120, 100.140).await.unwrap();
    rig.v2.push_position(-0.120, 100.576).await.unwrap();

    // inverse spread clears take-profit three ticks running
    rig.v1.push_book_prices(100.9, 0.5, 101.0, 1.0).await.unwrap();
    for _ in 0..3 {
        rig.v2.push_book_prices(100.0, 1.0, 100.1, 0.4).await.unwrap();
    }
    rig.v1.push_fill(-0.120, Some(100.80)).await.unwrap();
    rig.v2.push_fill(0.120, Some(100.20)).await.unwrap();
    rig.v1.push_position(0.0, 0.0).await.unwrap();
    rig.v2.push_position(0.0, 0.0).await.unwrap();
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    let state = engine.state();
    assert_eq!(state.v1.inv_qty, 0.0);
    assert_eq!(state.v2.inv_qty, 0.0);
    assert_eq!(state.v1.entry_price, 0.0);
    assert_eq!(state.v2.entry_price, 0.0);
    assert!(state.pending.is_none());
    assert!(state.trade_ctx.is_none());
    // one entry pair and one exit pair per venue
    assert_eq!(v1.orders().len(), 2);
    assert_eq!(v2.orders().len(), 2);
}

#[tokio::test]
async fn trade_budget_caps_fired_signals() {
    let mut cfg = pair_config();
    cfg.min_hits = 1;
    cfg.max_trades = Some(1);
    let rig = start(cfg, (0.0, 0.0), (0.0, 0.0)).await;

    rig.v1.push_book_prices(100.0, 1.0, 100.1, 0.5).await.unwrap();
    rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
    rig.v1.push_fill(0.120, Some(100.140)).await.unwrap();
    rig.v2.push_fill(-0.120, Some(100.576)).await.unwrap();
    rig.v1.push_position(0.120, 100.140).await.unwrap();
    rig.v2.push_position(-0.120, 100.576).await.unwrap();

    // budget exhausted: the same hot spread no longer fires
    for _ in 0..3 {
        rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
    }
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    assert_eq!(v1.orders().len(), 1);
    assert_eq!(v2.orders().len(), 1);
    assert_eq!(engine.state().signals_remaining, Some(0));
}

#[tokio::test]
async fn warmup_runs_both_directions_then_hands_over() {
    let mut cfg = pair_config();
    cfg.warm_up_orders = true;
    let rig = start(cfg, (0.0, 0.0), (0.0, 0.0)).await;

    // books are cold (negative TT spreads); warmup ignores thresholds
    rig.v1.push_book_prices(100.0, 1.0, 100.1, 1.0).await.unwrap();
    rig.v2.push_book_prices(100.0, 1.0, 100.1, 1.0).await.unwrap();
    rig.v1.push_fill(0.300, Some(100.1)).await.unwrap();
    rig.v2.push_fill(-0.300, Some(100.0)).await.unwrap();
    rig.v1.push_position(0.300, 100.1).await.unwrap();
    rig.v2.push_position(-0.300, 100.0).await.unwrap();

    // next tick fires the unwinding warmup leg pair
    rig.v2.push_book_prices(100.0, 1.0, 100.1, 1.0).await.unwrap();
    rig.v1.push_fill(-0.300, Some(100.0)).await.unwrap();
    rig.v2.push_fill(0.300, Some(100.1)).await.unwrap();
    rig.v1.push_position(0.0, 0.0).await.unwrap();
    rig.v2.push_position(0.0, 0.0).await.unwrap();

    // sequence done: cold books stay quiet
    rig.v2.push_book_prices(100.0, 1.0, 100.1, 1.0).await.unwrap();
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    let v1_orders = v1.orders();
    let v2_orders = v2.orders();
    assert_eq!(v1_orders.len(), 2);
    assert_eq!(v2_orders.len(), 2);
    assert_eq!(v1_orders[0].side, Side::Long);
    assert_eq!(v1_orders[1].side, Side::Short);
    assert_eq!(v2_orders[0].side, Side::Short);
    assert_eq!(v2_orders[1].side, Side::Long);
    assert_eq!(engine.state().warmup_stage, WarmupStage::Done);
    // warmup legs never consume the trade budget
    assert_eq!(engine.state().signals_remaining, None);
}

#[tokio::test]
async fn rejected_leg_leaves_pending_state_for_the_operator() {
    let rig = start(pair_config(), (0.0, 0.0), (0.0, 0.0)).await;
    rig.v1.reject_next("rate limited");
    push_entry_sequence(&rig).await;

    // the accepted short leg fills; the rejected long leg never will
    rig.v2.push_fill(-0.120, Some(100.576)).await.unwrap();
    for _ in 0..3 {
        rig.v2.push_book_prices(100.60, 0.4, 100.70, 1.0).await.unwrap();
    }
    let (v1, v2) = (rig.v1.clone(), rig.v2.clone());
    let engine = rig.stop().await;

    // rejection recorded, no order on the venue, no retry
    assert!(v1.orders().is_empty());
    assert_eq!(v2.orders().len(), 1);
    let state = engine.state();
    let pending = state.pending.as_ref().unwrap();
    assert!((pending.remaining(Venue::V1) - 0.120).abs() < 1e-9);
    assert_eq!(pending.remaining(Venue::V2), 0.0);
    assert!(state.trade_ctx.is_some());
}

#[tokio::test]
async fn disabled_position_sync_releases_on_fills_alone() {
    let cfg = pair_config();
    let v1 = PaperVenue::with_options(meta("alpha"), (0.0, 0.0), false, None);
    let v2 = PaperVenue::with_options(meta("beta"), (0.0, 0.0), false, None);
    let writer = Arc::new(TraceWriter::new(None, cfg.bot_id()));
    let mut engine = Engine::new(cfg, v1.clone(), v2.clone(), writer)
        .unwrap()
        .without_position_sync();
    let handle = tokio::spawn(async move {
        engine.run().await.unwrap();
        engine
    });
    v1.wait_subscribed().await;
    v2.wait_subscribed().await;
    let rig = Rig { v1, v2, handle };

    push_entry_sequence(&rig).await;
    rig.v1.push_fill(0.120, Some(100.140)).await.unwrap();
    rig.v2.push_fill(-0.120, Some(100.576)).await.unwrap();
    // no position snapshots at all: the trade still fully closes
    let engine = rig.stop().await;

    let state = engine.state();
    assert!(state.pending.is_none());
    assert!(state.trade_ctx.is_none());
    assert!((state.v1.inv_qty - 0.120).abs() < 1e-9);
}

/// Idempotence of the trace-keyed decision sections. Needs a reachable
/// Postgres; set BASISBOT_TEST_DATABASE_URL to run it.
#[tokio::test]
async fn trace_decision_upserts_are_idempotent() {
    let Ok(dsn) = std::env::var("BASISBOT_TEST_DATABASE_URL") else {
        eprintln!("skipping: BASISBOT_TEST_DATABASE_URL not set");
        return;
    };

    let bot_id = format!("TT:ITEST:{}", std::process::id());
    let writer = TraceWriter::new(Some(dsn.clone()), bot_id.clone());
    let trace = TraceId::generate();
    let flat = |inv_after: Option<&str>| DecisionRow {
        ts: chrono::Utc::now(),
        ob_v1: "100.0/100.1".to_string(),
        ob_v2: "100.6/100.7".to_string(),
        inv_before: "V1:0@0 | V2:0@0 | Δ -> 0.00%".to_string(),
        inv_after: inv_after.map(str::to_string),
        reason: "TT_12".to_string(),
        direction: "entry".to_string(),
        spread_signal: Some(0.4995),
        size: Some(0.12),
    };

    writer
        .init_or_update_decision(
            &trace,
            serde_json::json!({"MIN_SPREAD": 0.4}),
            serde_json::json!({"qty": 0.12}),
            serde_json::json!({"bid_price": 100.0}),
            serde_json::json!({"bid_price": 100.6}),
            flat(None),
        )
        .await;
    // identical write, then one with changed decision_data only
    writer
        .init_or_update_decision(
            &trace,
            serde_json::json!({"MIN_SPREAD": 0.4}),
            serde_json::json!({"qty": 0.12}),
            serde_json::json!({"bid_price": 100.0}),
            serde_json::json!({"bid_price": 100.6}),
            flat(None),
        )
        .await;
    writer
        .init_or_update_decision(
            &trace,
            serde_json::json!({"MIN_SPREAD": 0.4}),
            serde_json::json!({"qty": 0.12, "inv_after": "set"}),
            serde_json::json!({"bid_price": 100.0}),
            serde_json::json!({"bid_price": 100.6}),
            flat(Some("V1:0.12@100.14 | V2:-0.12@100.576 | Δ -> 0.43%")),
        )
        .await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&dsn)
        .await
        .unwrap();
    let (count,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM bot_traces WHERE bot_id = $1 AND trace = $2")
            .bind(&bot_id)
            .bind(trace.as_str())
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
    let (decision_data,): (String,) = sqlx::query_as(
        "SELECT decision_data::text FROM bot_traces WHERE bot_id = $1 AND trace = $2",
    )
    .bind(&bot_id)
    .bind(trace.as_str())
    .fetch_one(&pool)
    .await
    .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&decision_data).unwrap();
    assert_eq!(parsed["inv_after"], "set");
    // untouched sections survive the partial update
    let (configs,): (String,) = sqlx::query_as(
        "SELECT bot_configs::text FROM bot_traces WHERE bot_id = $1 AND trace = $2",
    )
    .bind(&bot_id)
    .bind(trace.as_str())
    .fetch_one(&pool)
    .await
    .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&configs).unwrap();
    assert_eq!(parsed["MIN_SPREAD"], 0.4);

    sqlx::query("DELETE FROM bot_traces WHERE bot_id = $1")
        .bind(&bot_id)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM decisions WHERE bot_name = $1")
        .bind(&bot_id)
        .execute(&pool)
        .await
        .unwrap();
}
