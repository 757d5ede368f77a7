//! In-process mutable state owned by the trade coordinator.
//!
//! All of it is a plain value: the coordinator's single task is the only
//! writer, helpers are methods taking `&mut self`, and nothing here holds a
//! lock or a back-reference.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Direction, OrderBookTop, ReasonTag, TraceId, Venue};

/// Consecutive-hit deques are bounded to at most this many entries.
pub const MAX_MIN_HITS: usize = 16;

// =============================================================================
// PER-VENUE STATE
// =============================================================================

/// Inventory and execution bookkeeping for one venue slot.
#[derive(Debug, Clone, Default)]
pub struct VenueState {
    pub inv_qty: f64,
    pub entry_price: f64,
    pub last_fill_price: Option<f64>,
    pub last_fill_latency_ms: Option<f64>,
    pub last_order_latency_ms: Option<f64>,
    /// Monotone counter bumped on every account-stream position snapshot.
    pub position_sequence: u64,
}

impl VenueState {
    /// Apply a signed fill of `delta` at `px`, maintaining the weighted-average
    /// entry price. Flat → entry resets to 0; a sign flip (or filling from
    /// flat) re-bases entry at the fill price.
    pub fn apply_fill(&mut self, delta: f64, px: f64) {
        let prev_qty = self.inv_qty;
        let mut new_qty = prev_qty + delta;
        if new_qty.abs() < 1e-9 {
            new_qty = 0.0;
        }
        if new_qty == 0.0 {
            self.entry_price = 0.0;
        } else if prev_qty == 0.0 || prev_qty.signum() != new_qty.signum() {
            self.entry_price = px;
        } else {
            self.entry_price = (prev_qty * self.entry_price + delta * px) / new_qty;
        }
        self.inv_qty = new_qty;
    }

    /// Overwrite from a venue position snapshot (venue-of-record) and return
    /// the implied inventory delta.
    pub fn apply_snapshot(&mut self, qty: f64, entry: f64) -> f64 {
        let delta = qty - self.inv_qty;
        self.inv_qty = qty;
        self.entry_price = if qty == 0.0 { 0.0 } else { entry };
        self.position_sequence += 1;
        delta
    }

    /// Absolute notional of the held position at its entry price.
    pub fn notional(&self) -> f64 {
        (self.inv_qty * self.entry_price).abs()
    }

    pub fn clear_trade_fields(&mut self) {
        self.last_fill_price = None;
        self.last_fill_latency_ms = None;
        self.last_order_latency_ms = None;
    }
}

// =============================================================================
// HIT HISTORY
// =============================================================================

/// One qualifying observation of a spread candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitRecord {
    pub ts: Option<DateTime<Utc>>,
    pub spread: f64,
    pub ob_v1: OrderBookTop,
    pub ob_v2: OrderBookTop,
}

/// Bounded deque of consecutive qualifying observations for one
/// (reason, direction) pair.
#[derive(Debug, Clone)]
pub struct HitHistory {
    cap: usize,
    entries: VecDeque<HitRecord>,
}

impl HitHistory {
    pub fn new(cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_MIN_HITS);
        HitHistory {
            cap,
            entries: VecDeque::with_capacity(cap),
        }
    }

    pub fn push(&mut self, record: HitRecord) {
        if self.entries.len() == self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.cap
    }

    pub fn all_above(&self, threshold: f64) -> bool {
        self.entries.iter().all(|h| h.spread > threshold)
    }

    pub fn spreads(&self) -> Vec<f64> {
        self.entries.iter().map(|h| h.spread).collect()
    }
}

// =============================================================================
// PENDING LEGS
// =============================================================================

/// Outstanding signed quantity per venue between dispatch and full
/// reconciliation. Remainders within tolerance snap to exactly zero.
#[derive(Debug, Clone)]
pub struct PendingLegs {
    v1_remaining: f64,
    v2_remaining: f64,
    tol: f64,
}

impl PendingLegs {
    /// Tolerance under which a leg counts as filled.
    pub fn tolerance_for(expected_qty: f64) -> f64 {
        f64::max(1e-6, expected_qty.abs() * 1e-4)
    }

    pub fn new(v1_signed: f64, v2_signed: f64, expected_qty: f64) -> Self {
        PendingLegs {
            v1_remaining: v1_signed,
            v2_remaining: v2_signed,
            tol: Self::tolerance_for(expected_qty),
        }
    }

    pub fn remaining(&self, venue: Venue) -> f64 {
        match venue {
            Venue::V1 => self.v1_remaining,
            Venue::V2 => self.v2_remaining,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tol
    }

    /// Subtract an observed signed delta from a leg's remainder.
    pub fn absorb(&mut self, venue: Venue, delta: f64) {
        let slot = match venue {
            Venue::V1 => &mut self.v1_remaining,
            Venue::V2 => &mut self.v2_remaining,
        };
        *slot -= delta;
        if slot.abs() < self.tol {
            *slot = 0.0;
        }
    }

    pub fn settled(&self) -> bool {
        self.v1_remaining.abs() < self.tol && self.v2_remaining.abs() < self.tol
    }
}

// =============================================================================
// TRADE CONTEXT
// =============================================================================

/// Copy of both inventories at a point in time; serialized into the trace
/// store's `inv_before`/`inv_after` sections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InvSnapshot {
    pub qty_v1: f64,
    pub entry_v1: f64,
    pub qty_v2: f64,
    pub entry_v2: f64,
}

/// Everything remembered about one firing decision from commit until the
/// finalize write lands and the position-sync gate releases.
#[derive(Debug, Clone)]
pub struct TradeContext {
    pub trace: TraceId,
    pub reason: ReasonTag,
    pub direction: Direction,
    pub spread_signal: Option<f64>,
    pub ob_v1: OrderBookTop,
    pub ob_v2: OrderBookTop,
    /// Taker-side OB price per venue at decision time.
    pub ob_price_v1: f64,
    pub ob_price_v2: f64,
    /// Slippage-adjusted prices the legs were sent at.
    pub exec_price_v1: Option<f64>,
    pub exec_price_v2: Option<f64>,
    pub expected_qty: f64,
    pub inv_before: InvSnapshot,
    pub signal_ts_wall: DateTime<Utc>,
    pub signal_ts_mono: Instant,
    /// Per-venue position-snapshot sequences at signal time; any snapshot
    /// after this counts as fresh for the position-sync gate.
    pub pos_seq_at_signal: (u64, u64),
}

impl TradeContext {
    pub fn exec_price(&self, venue: Venue) -> Option<f64> {
        match venue {
            Venue::V1 => self.exec_price_v1,
            Venue::V2 => self.exec_price_v2,
        }
    }

    pub fn ob_price(&self, venue: Venue) -> f64 {
        match venue {
            Venue::V1 => self.ob_price_v1,
            Venue::V2 => self.ob_price_v2,
        }
    }
}

// =============================================================================
// WARMUP
// =============================================================================

/// Opening plumbing-validation sequence: one forced V1→V2 entry, one forced
/// V2→V1 exit, ignoring spread thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupStage {
    V12Pending,
    V12Inflight,
    V21Pending,
    V21Inflight,
    Done,
}

// =============================================================================
// READINESS
// =============================================================================

/// First-message flags per venue; trading is held until every flag is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamReadiness {
    pub ob_v1: bool,
    pub ob_v2: bool,
    pub account_v1: bool,
    pub account_v2: bool,
    pub position_v1: bool,
    pub position_v2: bool,
}

impl StreamReadiness {
    pub fn all_ready(&self) -> bool {
        self.ob_v1
            && self.ob_v2
            && self.account_v1
            && self.account_v2
            && self.position_v1
            && self.position_v2
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if !self.ob_v1 {
            out.push("v1:ob");
        }
        if !self.ob_v2 {
            out.push("v2:ob");
        }
        if !self.account_v1 {
            out.push("v1:account");
        }
        if !self.account_v2 {
            out.push("v2:account");
        }
        if !self.position_v1 {
            out.push("v1:position");
        }
        if !self.position_v2 {
            out.push("v2:position");
        }
        out
    }
}

// =============================================================================
// ENGINE STATE
// =============================================================================

/// The whole mutable record one coordinator owns.
#[derive(Debug)]
pub struct EngineState {
    pub v1: VenueState,
    pub v2: VenueState,

    pub hedge_seeded: bool,
    pub streams: StreamReadiness,

    pub tt12_hits: u32,
    pub tt21_hits: u32,
    pub tt12_history: HitHistory,
    pub tt21_history: HitHistory,
    pub tt12_exit_history: HitHistory,
    pub tt21_exit_history: HitHistory,

    /// `None` = unlimited.
    pub signals_remaining: Option<i64>,
    pub warmup_stage: WarmupStage,
    pub last_ob_ts: Option<DateTime<Utc>>,

    pub pending: Option<PendingLegs>,
    pub trade_ctx: Option<TradeContext>,
}

impl EngineState {
    pub fn new(min_hits: usize, warm_up_orders: bool, max_trades: Option<i64>) -> Self {
        EngineState {
            v1: VenueState::default(),
            v2: VenueState::default(),
            hedge_seeded: false,
            streams: StreamReadiness::default(),
            tt12_hits: 0,
            tt21_hits: 0,
            tt12_history: HitHistory::new(min_hits),
            tt21_history: HitHistory::new(min_hits),
            tt12_exit_history: HitHistory::new(min_hits),
            tt21_exit_history: HitHistory::new(min_hits),
            signals_remaining: max_trades,
            warmup_stage: if warm_up_orders {
                WarmupStage::V12Pending
            } else {
                WarmupStage::Done
            },
            last_ob_ts: None,
            pending: None,
            trade_ctx: None,
        }
    }

    pub fn venue(&self, venue: Venue) -> &VenueState {
        match venue {
            Venue::V1 => &self.v1,
            Venue::V2 => &self.v2,
        }
    }

    pub fn venue_mut(&mut self, venue: Venue) -> &mut VenueState {
        match venue {
            Venue::V1 => &mut self.v1,
            Venue::V2 => &mut self.v2,
        }
    }

    /// Direction of the currently held paired inventory, if any.
    /// Long-V1/short-V2 reads as `Tt12`, the inverse as `Tt21`.
    pub fn inventory_bias(&self) -> Option<ReasonTag> {
        if self.v1.inv_qty > 0.0 && self.v2.inv_qty < 0.0 {
            Some(ReasonTag::Tt12)
        } else if self.v1.inv_qty < 0.0 && self.v2.inv_qty > 0.0 {
            Some(ReasonTag::Tt21)
        } else {
            None
        }
    }

    /// The larger per-venue position notional, used by the exposure cap.
    pub fn max_exposure(&self) -> f64 {
        f64::max(self.v1.notional(), self.v2.notional())
    }

    pub fn inventory_snapshot(&self) -> InvSnapshot {
        InvSnapshot {
            qty_v1: self.v1.inv_qty,
            entry_v1: self.v1.entry_price,
            qty_v2: self.v2.inv_qty,
            entry_v2: self.v2.entry_price,
        }
    }

    /// Drop all hit bookkeeping; called when a firing decision is committed.
    pub fn reset_histories(&mut self) {
        self.tt12_hits = 0;
        self.tt21_hits = 0;
        self.tt12_history.clear();
        self.tt21_history.clear();
        self.tt12_exit_history.clear();
        self.tt21_exit_history.clear();
    }

    pub fn consume_signal(&mut self) {
        if let Some(rem) = self.signals_remaining.as_mut() {
            *rem = (*rem - 1).max(0);
        }
    }
}
