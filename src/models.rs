//! Core data model shared by the engine, the venue adapters and the trace
//! store. Everything that crosses a module boundary is an explicit record
//! defined here — no transient fields bolted on after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// IDENTITY
// =============================================================================

/// The two venue slots of a pair. Roles are symmetric; the engine never
/// branches on which physical exchange sits behind a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    V1,
    V2,
}

impl Venue {
    pub fn other(&self) -> Venue {
        match self {
            Venue::V1 => Venue::V2,
            Venue::V2 => Venue::V1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::V1 => "V1",
            Venue::V2 => "V2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    /// Sign applied to an unsigned order size: +1 for longs, -1 for shorts.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    None,
    Take,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }
}

/// Why a paired decision fired. The suffix names the long-leg/short-leg venue
/// order: `Tt12` goes long on V1 and short on V2, `Tt21` the inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonTag {
    Tt12,
    Tt21,
    Warmup12,
    Warmup21,
}

impl ReasonTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonTag::Tt12 => "TT_12",
            ReasonTag::Tt21 => "TT_21",
            ReasonTag::Warmup12 => "WARMUP_12",
            ReasonTag::Warmup21 => "WARMUP_21",
        }
    }

    pub fn is_warmup(&self) -> bool {
        matches!(self, ReasonTag::Warmup12 | ReasonTag::Warmup21)
    }

    /// Venue bought by the long leg.
    pub fn long_venue(&self) -> Venue {
        match self {
            ReasonTag::Tt12 | ReasonTag::Warmup12 => Venue::V1,
            ReasonTag::Tt21 | ReasonTag::Warmup21 => Venue::V2,
        }
    }

    /// Venue sold by the short leg.
    pub fn short_venue(&self) -> Venue {
        self.long_venue().other()
    }
}

/// 128-bit identifier tying a firing decision to its trade and fill rows.
/// Stored in the dashless hex form everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

impl TraceId {
    pub fn generate() -> Self {
        TraceId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// MARKET DATA
// =============================================================================

/// Top-of-book snapshot for one venue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookTop {
    pub bid_price: f64,
    pub bid_size: f64,
    pub ask_price: f64,
    pub ask_size: f64,
    pub ts: DateTime<Utc>,
}

impl OrderBookTop {
    /// Price a taker crosses on `side`: ask when buying, bid when selling.
    pub fn taker_price(&self, side: Side) -> f64 {
        match side {
            Side::Long => self.ask_price,
            Side::Short => self.bid_price,
        }
    }

    /// Depth available to a taker on `side`.
    pub fn taker_depth(&self, side: Side) -> f64 {
        match side {
            Side::Long => self.ask_size,
            Side::Short => self.bid_size,
        }
    }

    /// The `(bp, bs, ap, as)` tuple used for duplicate suppression.
    pub fn dedup_key(&self) -> (f64, f64, f64, f64) {
        (self.bid_price, self.bid_size, self.ask_price, self.ask_size)
    }
}

/// The six directional spreads plus the inventory spread, all in percent.
/// A component is `None` whenever a required price is missing. Only the TT
/// pair drives decisions; the MT/TM variants ride along for observability.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpreadSet {
    pub tt_12: Option<f64>,
    pub tt_21: Option<f64>,
    pub mt_12: Option<f64>,
    pub mt_21: Option<f64>,
    pub tm_12: Option<f64>,
    pub tm_21: Option<f64>,
    pub inv: f64,
}

impl SpreadSet {
    /// Signal spread for a reason tag; warmup tags read the matching TT slot.
    pub fn for_reason(&self, reason: ReasonTag) -> Option<f64> {
        match reason {
            ReasonTag::Tt12 | ReasonTag::Warmup12 => self.tt_12,
            ReasonTag::Tt21 | ReasonTag::Warmup21 => self.tt_21,
        }
    }
}

// =============================================================================
// ACCOUNT DATA
// =============================================================================

/// Signed own-account fill delta reported by a venue's account stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEvent {
    pub delta: f64,
    pub price: Option<f64>,
    pub latency_ms: Option<f64>,
}

/// Position snapshot reported by a venue's account stream (or the one-shot
/// REST fetch before streaming begins). Venue-of-record: overwrites local
/// bookkeeping wholesale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub qty: f64,
    pub entry: f64,
}

// =============================================================================
// ENGINE EVENTS
// =============================================================================

/// The merged event stream feeding one engine task. Adapters push, the
/// engine pulls; per-venue per-channel ordering rides on the mpsc FIFO.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Ob(Venue, OrderBookTop),
    Fill(Venue, FillEvent),
    Position(Venue, PositionSnapshot),
    Tick,
    /// Drain-and-stop: the loop finishes the current event and returns.
    Shutdown,
}

// =============================================================================
// DECISIONS
// =============================================================================

/// One leg of a firing decision. Firing decisions always come in pairs
/// sharing reason, direction and suggested size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: ActionType,
    pub venue: Venue,
    pub side: Side,
    pub reason: ReasonTag,
    pub direction: Direction,
    pub suggested_size: Option<f64>,
    /// Raw top-of-book price the leg was decided against (pre-slippage).
    pub ref_price: Option<f64>,
    /// Stamped by the coordinator when the pair is committed.
    pub trace: Option<TraceId>,
}

impl Decision {
    pub fn take(
        venue: Venue,
        side: Side,
        reason: ReasonTag,
        direction: Direction,
        size: f64,
        ref_price: f64,
    ) -> Self {
        Decision {
            action: ActionType::Take,
            venue,
            side,
            reason,
            direction,
            suggested_size: Some(size),
            ref_price: Some(ref_price),
            trace: None,
        }
    }
}
