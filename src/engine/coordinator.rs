//! Trade coordinator: one task owning the whole per-pair loop.
//!
//! Four event sources (two books, two account streams) plus a periodic tick
//! fan into a single mpsc channel; the loop computes spreads on every book
//! tick, consults the decision logic, dispatches both legs of a firing pair
//! concurrently and then blocks new decisions until the account streams
//! reconcile both fills. At most one trade is ever in flight.
//!
//! State machine per trade:
//! IDLE → DISPATCHING → PENDING_FILLS → FINALIZING → IDLE, where FINALIZING
//! also covers the optional wait for fresh position snapshots before the
//! next decision may run on venue-of-record state.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::PairConfig;
use crate::engine::audit::{self, LegAudit, TradeAudit};
use crate::engine::books::{BookSet, BookUpdate};
use crate::engine::decision::{decide, DecisionParams};
use crate::engine::sizing::{shared_pair_size, SizingParams};
use crate::engine::spreads::calc_spreads;
use crate::engine::state::{EngineState, PendingLegs, TradeContext, WarmupStage};
use crate::models::{
    Decision, EngineEvent, FillEvent, OrderBookTop, PositionSnapshot, ReasonTag, Side, SpreadSet,
    TraceId, Venue,
};
use crate::trace::{DecisionRow, TraceSection, TraceWriter};
use crate::venues::{VenueAdapter, VenueMeta};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const TICK_INTERVAL_MS: u64 = 1_000;

/// Per-pair arbitrage engine.
pub struct Engine {
    cfg: PairConfig,
    v1: Arc<dyn VenueAdapter>,
    v2: Arc<dyn VenueAdapter>,
    meta_v1: VenueMeta,
    meta_v2: VenueMeta,
    books: BookSet,
    state: EngineState,
    writer: Arc<TraceWriter>,
    /// Position-sequence targets that release the next decision after a
    /// finalized trade (position-sync gate).
    pos_wait: Option<(u64, u64)>,
    position_sync: bool,
    /// Finalized audit kept until the position gate releases, so the last
    /// decision_data refresh reflects venue-of-record inventories.
    last_audit: Option<TradeAudit>,
    ready_logged: bool,
    waiting_logged: bool,
}

impl Engine {
    /// Build an engine for one pair. Fails fast on configuration that can
    /// never trade (the supervisor treats this as fatal, not restartable).
    pub fn new(
        cfg: PairConfig,
        v1: Arc<dyn VenueAdapter>,
        v2: Arc<dyn VenueAdapter>,
        writer: Arc<TraceWriter>,
    ) -> Result<Self> {
        cfg.validate()?;
        let meta_v1 = v1.meta();
        let meta_v2 = v2.meta();
        cfg.validate_against_meta(&meta_v1, &meta_v2)?;

        let state = EngineState::new(cfg.min_hits(), cfg.warm_up_orders, cfg.max_trades);
        let books = BookSet::new(cfg.dedup_ob);
        info!(
            "[CONFIG] {} minSpread={} spreadTP={} minHits={} maxPosValue={:?} \
             maxTradeValue={:?} maxOfOb={} slippage={} dedup={} warmUp={} maxTrades={:?} \
             v1[min_size={} min_notional={} step={}] v2[min_size={} min_notional={} step={}]",
            cfg.bot_id(),
            cfg.min_spread,
            cfg.spread_tp,
            cfg.min_hits(),
            cfg.max_position_value,
            cfg.max_trade_value,
            cfg.max_of_ob,
            cfg.slippage,
            cfg.dedup_ob,
            cfg.warm_up_orders,
            cfg.max_trades,
            meta_v1.min_size,
            meta_v1.min_notional,
            meta_v1.size_step,
            meta_v2.min_size,
            meta_v2.min_notional,
            meta_v2.size_step,
        );

        Ok(Engine {
            cfg,
            v1,
            v2,
            meta_v1,
            meta_v2,
            books,
            state,
            writer,
            pos_wait: None,
            position_sync: true,
            last_audit: None,
            ready_logged: false,
            waiting_logged: false,
        })
    }

    /// Disable the wait for fresh position snapshots between trades.
    pub fn without_position_sync(mut self) -> Self {
        self.position_sync = false;
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    fn adapter(&self, venue: Venue) -> Arc<dyn VenueAdapter> {
        match venue {
            Venue::V1 => self.v1.clone(),
            Venue::V2 => self.v2.clone(),
        }
    }

    /// Seed positions, start the streams and run the loop until every event
    /// source has gone away.
    pub async fn run(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);

        let (q1, e1) = self
            .v1
            .load_initial_position()
            .await
            .context("loading initial V1 position")?;
        let (q2, e2) = self
            .v2
            .load_initial_position()
            .await
            .context("loading initial V2 position")?;
        self.state.v1.inv_qty = q1;
        self.state.v1.entry_price = if q1 == 0.0 { 0.0 } else { e1 };
        self.state.v2.inv_qty = q2;
        self.state.v2.entry_price = if q2 == 0.0 { 0.0 } else { e2 };
        self.state.hedge_seeded = true;
        info!(
            "[INIT] {} {}",
            self.cfg.bot_id(),
            audit::inventory_block(&self.state.inventory_snapshot())
        );

        self.v1
            .subscribe(Venue::V1, tx.clone())
            .await
            .context("subscribing V1 streams")?;
        self.v2
            .subscribe(Venue::V2, tx.clone())
            .await
            .context("subscribing V2 streams")?;

        let tick_tx = tx.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(TICK_INTERVAL_MS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tick_tx.send(EngineEvent::Tick).await.is_err() {
                    return;
                }
            }
        });
        drop(tx);

        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Ob(venue, top) => self.on_ob(venue, top).await,
                EngineEvent::Fill(venue, fill) => self.on_fill(venue, fill).await,
                EngineEvent::Position(venue, snap) => self.on_position(venue, snap).await,
                EngineEvent::Tick => self.on_tick().await,
                EngineEvent::Shutdown => {
                    info!("[SHUTDOWN] {} engine stopping", self.cfg.bot_id());
                    break;
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // event handlers
    // -------------------------------------------------------------------------

    async fn on_ob(&mut self, venue: Venue, top: OrderBookTop) {
        match venue {
            Venue::V1 => self.state.streams.ob_v1 = true,
            Venue::V2 => self.state.streams.ob_v2 = true,
        }
        match self.books.apply(venue, top) {
            BookUpdate::Accepted => {}
            BookUpdate::Duplicate | BookUpdate::Rejected => return,
        }
        self.state.last_ob_ts = Some(top.ts);
        self.evaluate_tick().await;
    }

    async fn on_fill(&mut self, venue: Venue, fill: FillEvent) {
        match venue {
            Venue::V1 => self.state.streams.account_v1 = true,
            Venue::V2 => self.state.streams.account_v2 = true,
        }

        let mut delta = fill.delta;
        if let Some(pending) = &self.state.pending {
            let rem = pending.remaining(venue);
            // defensive clamp against oversized deltas from unrelated activity
            if rem != 0.0 && delta.abs() > rem.abs() * 1.1 {
                warn!(
                    venue = venue.as_str(),
                    delta,
                    pending = rem,
                    "[FILL CLAMP] oversized fill delta clamped to pending remainder"
                );
                delta = delta.signum() * rem.abs();
            }
        }

        let px = fill
            .price
            .or_else(|| {
                self.state
                    .trade_ctx
                    .as_ref()
                    .and_then(|ctx| ctx.exec_price(venue))
            })
            .or(self.state.venue(venue).last_fill_price)
            .or_else(|| {
                self.books.get(venue).map(|ob| {
                    ob.taker_price(if delta > 0.0 { Side::Long } else { Side::Short })
                })
            });

        let latency = fill.latency_ms.or_else(|| {
            self.state
                .trade_ctx
                .as_ref()
                .map(|ctx| ctx.signal_ts_mono.elapsed().as_secs_f64() * 1_000.0)
        });

        let venue_state = self.state.venue_mut(venue);
        if let Some(px) = px {
            venue_state.apply_fill(delta, px);
            venue_state.last_fill_price = Some(px);
        } else {
            warn!(venue = venue.as_str(), delta, "[FILL] no usable price; inventory unchanged");
        }
        venue_state.last_fill_latency_ms = latency;

        if let Some(pending) = self.state.pending.as_mut() {
            pending.absorb(venue, delta);
        }

        let trace = self
            .state
            .trade_ctx
            .as_ref()
            .map(|ctx| ctx.trace.to_string())
            .unwrap_or_else(|| "-".to_string());
        info!("[FILLED {}] {} delta={}", venue.as_str(), trace, delta);

        self.try_finalize().await;
    }

    async fn on_position(&mut self, venue: Venue, snap: PositionSnapshot) {
        match venue {
            Venue::V1 => {
                self.state.streams.account_v1 = true;
                self.state.streams.position_v1 = true;
            }
            Venue::V2 => {
                self.state.streams.account_v2 = true;
                self.state.streams.position_v2 = true;
            }
        }

        let delta = self.state.venue_mut(venue).apply_snapshot(snap.qty, snap.entry);
        debug!(
            venue = venue.as_str(),
            qty = snap.qty,
            entry = snap.entry,
            delta,
            "[POSITION] snapshot applied"
        );
        // a fresh snapshot is authoritative; it may settle a lagging leg
        if let Some(pending) = self.state.pending.as_mut() {
            if delta != 0.0 {
                pending.absorb(venue, delta);
            }
        }

        self.try_finalize().await;
        self.release_position_gate().await;
    }

    async fn on_tick(&mut self) {
        if let Some(pending) = &self.state.pending {
            if !pending.settled() {
                debug!(
                    v1 = pending.remaining(Venue::V1),
                    v2 = pending.remaining(Venue::V2),
                    "[PENDING] waiting for fills"
                );
            }
        }
        self.try_finalize().await;
        self.release_position_gate().await;
    }

    // -------------------------------------------------------------------------
    // decision path
    // -------------------------------------------------------------------------

    async fn evaluate_tick(&mut self) {
        if !self.state.hedge_seeded {
            return;
        }
        if !self.state.streams.all_ready() {
            if !self.waiting_logged {
                info!("[WAITING] {}", self.state.streams.missing().join(" "));
                self.waiting_logged = true;
            }
            return;
        }
        self.waiting_logged = false;
        if !self.ready_logged {
            info!("[READY TO LOOP] {} streams and positions synced", self.cfg.bot_id());
            self.ready_logged = true;
        }

        if self.pos_wait.is_some() {
            return;
        }

        if let Some(pending) = &self.state.pending {
            if !pending.settled() {
                return;
            }
            self.try_finalize().await;
            return;
        }
        if self.state.trade_ctx.is_some() {
            return;
        }

        let (ob_v1, ob_v2) = match self.books.both() {
            Some((a, b)) => (*a, *b),
            None => return,
        };

        let spreads = calc_spreads(&ob_v1, &ob_v2, &self.state);
        debug!(
            "[SPREADS] tt12={} tt21={} mt12={} mt21={} tm12={} tm21={} inv={:.4}",
            fmt_spread(spreads.tt_12),
            fmt_spread(spreads.tt_21),
            fmt_spread(spreads.mt_12),
            fmt_spread(spreads.mt_21),
            fmt_spread(spreads.tm_12),
            fmt_spread(spreads.tm_21),
            spreads.inv,
        );
        let sizing = |reason| {
            shared_pair_size(
                reason,
                &SizingParams {
                    ob_v1: &ob_v1,
                    ob_v2: &ob_v2,
                    meta_v1: &self.meta_v1,
                    meta_v2: &self.meta_v2,
                    max_of_ob: self.cfg.max_of_ob,
                    max_trade_value: self.cfg.max_trade_value,
                    slippage: self.cfg.slippage,
                },
            )
        };
        let params = DecisionParams {
            min_spread: self.cfg.min_spread,
            spread_tp: self.cfg.spread_tp,
            min_hits: self.cfg.min_hits(),
            size_hint_12: sizing(ReasonTag::Tt12),
            size_hint_21: sizing(ReasonTag::Tt21),
            max_position_value: self.cfg.max_position_value,
            warmup_enabled: self.cfg.warm_up_orders,
        };

        let Some(pair) = decide(&mut self.state, &spreads, &ob_v1, &ob_v2, &params) else {
            return;
        };
        self.commit_and_dispatch(pair, spreads, ob_v1, ob_v2).await;
    }

    async fn commit_and_dispatch(
        &mut self,
        mut pair: [Decision; 2],
        spreads: SpreadSet,
        ob_v1: OrderBookTop,
        ob_v2: OrderBookTop,
    ) {
        let reason = pair[0].reason;
        let direction = pair[0].direction;
        let size = pair[0].suggested_size.unwrap_or(0.0);
        if size <= 0.0 {
            return;
        }

        let trace = TraceId::generate();
        for leg in pair.iter_mut() {
            leg.trace = Some(trace.clone());
        }

        let mut ctx = TradeContext {
            trace: trace.clone(),
            reason,
            direction,
            spread_signal: spreads.for_reason(reason),
            ob_v1,
            ob_v2,
            ob_price_v1: 0.0,
            ob_price_v2: 0.0,
            exec_price_v1: None,
            exec_price_v2: None,
            expected_qty: size,
            inv_before: self.state.inventory_snapshot(),
            signal_ts_wall: Utc::now(),
            signal_ts_mono: Instant::now(),
            pos_seq_at_signal: (
                self.state.v1.position_sequence,
                self.state.v2.position_sequence,
            ),
        };

        // per-leg prices: raw OB reference and the slippage-adjusted send price
        let mut signed = [0.0_f64; 2];
        for (i, leg) in pair.iter().enumerate() {
            let ob_price = leg.ref_price.unwrap_or(0.0);
            let exec = ob_price * (1.0 + leg.side.sign() * self.cfg.slippage);
            match leg.venue {
                Venue::V1 => {
                    ctx.ob_price_v1 = ob_price;
                    ctx.exec_price_v1 = Some(exec);
                }
                Venue::V2 => {
                    ctx.ob_price_v2 = ob_price;
                    ctx.exec_price_v2 = Some(exec);
                }
            }
            signed[i] = leg.side.sign() * size;
        }

        info!(
            "[DECISION MADE] {} {} {} qty={} spread={:?}",
            trace,
            reason.as_str(),
            direction.as_str(),
            size,
            ctx.spread_signal
        );

        // the run is consumed the moment the pair fires
        self.state.reset_histories();
        match (reason, self.state.warmup_stage) {
            (ReasonTag::Warmup12, WarmupStage::V12Pending) => {
                self.state.warmup_stage = WarmupStage::V12Inflight;
            }
            (ReasonTag::Warmup21, WarmupStage::V21Pending) => {
                self.state.warmup_stage = WarmupStage::V21Inflight;
            }
            _ => {}
        }
        if !reason.is_warmup() {
            self.state.consume_signal();
        }

        let (v1_signed, v2_signed) = if pair[0].venue == Venue::V1 {
            (signed[0], signed[1])
        } else {
            (signed[1], signed[0])
        };
        self.state.pending = Some(PendingLegs::new(v1_signed, v2_signed, size));
        self.state.trade_ctx = Some(ctx.clone());
        self.last_audit = None;

        // both legs and the initial decision row go out together
        let leg_a = pair[0].clone();
        let leg_b = pair[1].clone();
        let adapter_a = self.adapter(leg_a.venue);
        let adapter_b = self.adapter(leg_b.venue);
        let exec_a = ctx.exec_price(leg_a.venue).unwrap_or(0.0);
        let exec_b = ctx.exec_price(leg_b.venue).unwrap_or(0.0);
        let signal_mono = ctx.signal_ts_mono;

        let decision_write = self.write_initial_decision(&ctx);
        let send_a = send_leg(adapter_a, leg_a.side, size, exec_a, signal_mono);
        let send_b = send_leg(adapter_b, leg_b.side, size, exec_b, signal_mono);
        let (out_a, out_b, ()) = tokio::join!(send_a, send_b, decision_write);

        for (leg, outcome) in [(&leg_a, out_a), (&leg_b, out_b)] {
            self.state.venue_mut(leg.venue).last_order_latency_ms = Some(outcome.latency_ms);
            if outcome.status != "OK" {
                warn!(
                    venue = leg.venue.as_str(),
                    status = %outcome.status,
                    resp = outcome.resp.as_deref().unwrap_or(""),
                    "[SEND FAILED] {} leg not confirmed; pending untouched",
                    trace
                );
            }
            self.writer
                .insert_trade_row(
                    &trace,
                    ctx.signal_ts_wall,
                    leg.venue,
                    leg.side.sign() * size,
                    leg.ref_price.unwrap_or(0.0),
                    ctx.exec_price(leg.venue).unwrap_or(0.0),
                    Some(outcome.latency_ms),
                    reason.as_str(),
                    direction.as_str(),
                    &outcome.status,
                    outcome.payload.clone(),
                    outcome.resp.clone(),
                )
                .await;
        }
    }

    // -------------------------------------------------------------------------
    // finalize path
    // -------------------------------------------------------------------------

    /// PENDING_FILLS → FINALIZING, safe to call from any event path.
    async fn try_finalize(&mut self) {
        let settled = matches!(&self.state.pending, Some(p) if p.settled());
        if !settled {
            return;
        }
        let Some(ctx) = self.state.trade_ctx.clone() else {
            // context vanished (positions re-seeded mid-trade); just unblock
            self.state.pending = None;
            return;
        };

        info!(
            "[BOTH VENUES FILLED] {} {}",
            ctx.trace,
            audit::inventory_block(&self.state.inventory_snapshot())
        );

        let reason = ctx.reason;
        let fill_v1 = self
            .state
            .v1
            .last_fill_price
            .or(ctx.exec_price_v1)
            .or(Some(ctx.ob_price_v1));
        let fill_v2 = self
            .state
            .v2
            .last_fill_price
            .or(ctx.exec_price_v2)
            .or(Some(ctx.ob_price_v2));
        let spread_filled =
            audit::filled_spread(reason, fill_v1, fill_v2).or(ctx.spread_signal);

        let leg = |venue: Venue, side: Side| LegAudit {
            venue,
            side,
            ob_price: ctx.ob_price(venue),
            exec_price: ctx.exec_price(venue),
            fill_price: match venue {
                Venue::V1 => fill_v1,
                Venue::V2 => fill_v2,
            },
            lat_order_ms: self.state.venue(venue).last_order_latency_ms,
            lat_fill_ms: self.state.venue(venue).last_fill_latency_ms,
        };
        let audit = TradeAudit {
            ts: ctx.signal_ts_wall,
            reason,
            direction: ctx.direction,
            qty: ctx.expected_qty,
            spread_signal: ctx.spread_signal,
            spread_filled,
            inv_before: ctx.inv_before,
            inv_after: self.state.inventory_snapshot(),
            long_leg: leg(reason.long_venue(), Side::Long),
            short_leg: leg(reason.short_venue(), Side::Short),
        };
        info!("[TRADE] {}", audit.line());

        // fill rows, long leg positive, short leg negative
        let long_venue = reason.long_venue();
        for venue in [Venue::V1, Venue::V2] {
            let base = if venue == long_venue {
                ctx.expected_qty
            } else {
                -ctx.expected_qty
            };
            let (price, lat) = match venue {
                Venue::V1 => (fill_v1, self.state.v1.last_fill_latency_ms),
                Venue::V2 => (fill_v2, self.state.v2.last_fill_latency_ms),
            };
            self.writer
                .insert_fill_row(&ctx.trace, ctx.signal_ts_wall, venue, Some(base), price, lat)
                .await;
        }

        // final decision record with inv_after
        self.write_final_decision(&ctx, &audit).await;

        match (reason, self.state.warmup_stage) {
            (ReasonTag::Warmup12, WarmupStage::V12Inflight) => {
                self.state.warmup_stage = WarmupStage::V21Pending;
                info!("[WARMUP] first leg pair complete; unwinding next");
            }
            (ReasonTag::Warmup21, WarmupStage::V21Inflight) => {
                self.state.warmup_stage = WarmupStage::Done;
                info!("[WARMUP] sequence complete");
            }
            _ => {}
        }

        self.state.v1.clear_trade_fields();
        self.state.v2.clear_trade_fields();
        self.state.pending = None;

        if self.position_sync {
            // anything after the signal counts as fresh
            self.pos_wait = Some((ctx.pos_seq_at_signal.0 + 1, ctx.pos_seq_at_signal.1 + 1));
            self.last_audit = Some(audit);
            self.release_position_gate().await;
        } else {
            self.state.trade_ctx = None;
        }
    }

    /// FINALIZING → IDLE once both venues have confirmed fresh positions.
    async fn release_position_gate(&mut self) {
        let Some((t1, t2)) = self.pos_wait else { return };
        if self.state.v1.position_sequence < t1 || self.state.v2.position_sequence < t2 {
            return;
        }
        self.pos_wait = None;
        let ctx = self.state.trade_ctx.take();
        if let (Some(ctx), Some(mut audit)) = (ctx, self.last_audit.take()) {
            // refresh the record with venue-of-record inventories
            audit.inv_after = self.state.inventory_snapshot();
            self.writer
                .upsert_section(
                    &ctx.trace,
                    TraceSection::DecisionData,
                    audit.decision_data(&ctx.trace),
                )
                .await;
            info!(
                "[POSITIONS SYNCED] {} {}",
                ctx.trace,
                audit::inventory_block(&audit.inv_after)
            );
        }
    }

    // -------------------------------------------------------------------------
    // trace payloads
    // -------------------------------------------------------------------------

    async fn write_initial_decision(&self, ctx: &TradeContext) {
        let decision_data = json!({
            "trace": ctx.trace.as_str(),
            "ts": ctx.signal_ts_wall.to_rfc3339(),
            "reason": ctx.reason.as_str(),
            "direction": ctx.direction.as_str(),
            "qty": ctx.expected_qty,
            "spread_signal": ctx.spread_signal,
            "inv_before": audit::inv_json(&ctx.inv_before),
        });
        self.writer
            .init_or_update_decision(
                &ctx.trace,
                serde_json::to_value(&self.cfg).unwrap_or_default(),
                decision_data,
                serde_json::to_value(ctx.ob_v1).unwrap_or_default(),
                serde_json::to_value(ctx.ob_v2).unwrap_or_default(),
                self.flat_row(ctx, None),
            )
            .await;
    }

    async fn write_final_decision(&self, ctx: &TradeContext, audit: &TradeAudit) {
        self.writer
            .init_or_update_decision(
                &ctx.trace,
                serde_json::to_value(&self.cfg).unwrap_or_default(),
                audit.decision_data(&ctx.trace),
                serde_json::to_value(ctx.ob_v1).unwrap_or_default(),
                serde_json::to_value(ctx.ob_v2).unwrap_or_default(),
                self.flat_row(ctx, Some(audit::inventory_block(&audit.inv_after))),
            )
            .await;
    }

    fn flat_row(&self, ctx: &TradeContext, inv_after: Option<String>) -> DecisionRow {
        DecisionRow {
            ts: ctx.signal_ts_wall,
            ob_v1: format!("{}/{}", ctx.ob_v1.bid_price, ctx.ob_v1.ask_price),
            ob_v2: format!("{}/{}", ctx.ob_v2.bid_price, ctx.ob_v2.ask_price),
            inv_before: audit::inventory_block(&ctx.inv_before),
            inv_after,
            reason: ctx.reason.as_str().to_string(),
            direction: ctx.direction.as_str().to_string(),
            spread_signal: ctx.spread_signal,
            size: Some(ctx.expected_qty),
        }
    }
}

fn fmt_spread(v: Option<f64>) -> String {
    v.map(|s| format!("{s:.4}")).unwrap_or_else(|| "None".to_string())
}

/// Outcome of one leg submission, with latency attributed from the signal.
struct LegOutcome {
    status: String,
    payload: Option<String>,
    resp: Option<String>,
    latency_ms: f64,
}

async fn send_leg(
    adapter: Arc<dyn VenueAdapter>,
    side: Side,
    size: f64,
    exec_price: f64,
    signal_mono: Instant,
) -> LegOutcome {
    match adapter.send_market(side, size, exec_price).await {
        Ok(outcome) => LegOutcome {
            status: outcome.status,
            payload: outcome.payload,
            resp: outcome.resp,
            latency_ms: signal_mono.elapsed().as_secs_f64() * 1_000.0,
        },
        Err(e) => LegOutcome {
            status: "ERROR".to_string(),
            payload: None,
            resp: Some(e.to_string()),
            latency_ms: signal_mono.elapsed().as_secs_f64() * 1_000.0,
        },
    }
}
