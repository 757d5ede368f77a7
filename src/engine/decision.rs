//! Decision logic: pure function from (state, spreads, books, thresholds) to
//! a paired decision or nothing. The only state it mutates is hit-counter
//! bookkeeping; dispatch and persistence live in the coordinator.
//!
//! Processing order: trade budget → warmup → exits → entry counters →
//! best candidate → exposure cap → size sanity.

use crate::engine::state::{EngineState, HitRecord, WarmupStage};
use crate::models::{Decision, Direction, OrderBookTop, ReasonTag, Side, SpreadSet};

pub struct DecisionParams {
    /// Entry threshold in percent.
    pub min_spread: f64,
    /// Take-profit threshold on the inverse spread, in percent.
    pub spread_tp: f64,
    /// Consecutive qualifying ticks required before firing.
    pub min_hits: usize,
    /// Shared pair size for the long-V1/short-V2 direction; 0 = unavailable.
    pub size_hint_12: f64,
    /// Shared pair size for the long-V2/short-V1 direction; 0 = unavailable.
    pub size_hint_21: f64,
    /// `None` = unlimited; `Some(0)` blocks all entries.
    pub max_position_value: Option<f64>,
    pub warmup_enabled: bool,
}

/// Evaluate one tick. `Some` is always a pair of TAKE legs sharing reason,
/// direction and size.
pub fn decide(
    state: &mut EngineState,
    spreads: &SpreadSet,
    ob_v1: &OrderBookTop,
    ob_v2: &OrderBookTop,
    p: &DecisionParams,
) -> Option<[Decision; 2]> {
    // 1) trade budget gate
    if matches!(state.signals_remaining, Some(rem) if rem <= 0) {
        return None;
    }

    // 2) warmup gate: forced plumbing trades, spread checks bypassed
    if p.warmup_enabled {
        match state.warmup_stage {
            WarmupStage::V12Pending => {
                if p.size_hint_12 <= 0.0 {
                    return None;
                }
                return Some(make_pair(
                    ReasonTag::Warmup12,
                    Direction::Entry,
                    p.size_hint_12,
                    ob_v1,
                    ob_v2,
                ));
            }
            WarmupStage::V21Pending => {
                if p.size_hint_21 <= 0.0 {
                    return None;
                }
                return Some(make_pair(
                    ReasonTag::Warmup21,
                    Direction::Exit,
                    p.size_hint_21,
                    ob_v1,
                    ob_v2,
                ));
            }
            WarmupStage::V12Inflight | WarmupStage::V21Inflight => return None,
            WarmupStage::Done => {}
        }
    }

    let bias = state.inventory_bias();

    // 3) exit evaluation against the inverse spread
    if bias == Some(ReasonTag::Tt12) {
        match spreads.tt_21 {
            Some(v) => {
                state
                    .tt21_exit_history
                    .push(hit(state.last_ob_ts, v, ob_v1, ob_v2));
                if state.tt21_exit_history.is_full()
                    && state.tt21_exit_history.all_above(p.spread_tp)
                {
                    if p.size_hint_21 <= 0.0 {
                        return None;
                    }
                    return Some(make_pair(
                        ReasonTag::Tt21,
                        Direction::Exit,
                        p.size_hint_21,
                        ob_v1,
                        ob_v2,
                    ));
                }
            }
            None => state.tt21_exit_history.clear(),
        }
    } else if bias == Some(ReasonTag::Tt21) {
        match spreads.tt_12 {
            Some(v) => {
                state
                    .tt12_exit_history
                    .push(hit(state.last_ob_ts, v, ob_v1, ob_v2));
                if state.tt12_exit_history.is_full()
                    && state.tt12_exit_history.all_above(p.spread_tp)
                {
                    if p.size_hint_12 <= 0.0 {
                        return None;
                    }
                    return Some(make_pair(
                        ReasonTag::Tt12,
                        Direction::Exit,
                        p.size_hint_12,
                        ob_v1,
                        ob_v2,
                    ));
                }
            }
            None => state.tt12_exit_history.clear(),
        }
    }

    // 4) entry hit counters; a miss resets the run
    {
        let rec = spreads
            .tt_12
            .filter(|v| *v > p.min_spread)
            .map(|v| hit(state.last_ob_ts, v, ob_v1, ob_v2));
        match rec {
            Some(r) => {
                state.tt12_hits += 1;
                state.tt12_history.push(r);
            }
            None => {
                state.tt12_hits = 0;
                state.tt12_history.clear();
            }
        }
        let rec = spreads
            .tt_21
            .filter(|v| *v > p.min_spread)
            .map(|v| hit(state.last_ob_ts, v, ob_v1, ob_v2));
        match rec {
            Some(r) => {
                state.tt21_hits += 1;
                state.tt21_history.push(r);
            }
            None => {
                state.tt21_hits = 0;
                state.tt21_history.clear();
            }
        }
    }

    // holding a position masks the opposite candidate: scale-ins only
    let mut cand_12 = spreads.tt_12;
    let mut cand_21 = spreads.tt_21;
    match bias {
        Some(ReasonTag::Tt12) => cand_21 = None,
        Some(ReasonTag::Tt21) => cand_12 = None,
        _ => {}
    }

    // 5) best candidate; ties resolve to TT_12 deterministically
    let (reason, best) = match (cand_12, cand_21) {
        (Some(a), Some(b)) if b > a => (ReasonTag::Tt21, b),
        (Some(a), _) => (ReasonTag::Tt12, a),
        (None, Some(b)) => (ReasonTag::Tt21, b),
        (None, None) => return None,
    };
    if best <= p.min_spread {
        return None;
    }
    let hits = match reason {
        ReasonTag::Tt12 => state.tt12_hits,
        _ => state.tt21_hits,
    };
    if (hits as usize) < p.min_hits {
        return None;
    }

    // 6) exposure cap blocks entries only (exits already returned above)
    if let Some(cap) = p.max_position_value {
        if cap <= 0.0 || state.max_exposure() >= cap {
            return None;
        }
    }

    // 7) size sanity
    let hint = match reason {
        ReasonTag::Tt12 => p.size_hint_12,
        _ => p.size_hint_21,
    };
    if hint <= 0.0 {
        return None;
    }

    // 8) emit the paired entry
    Some(make_pair(reason, Direction::Entry, hint, ob_v1, ob_v2))
}

fn hit(
    ts: Option<chrono::DateTime<chrono::Utc>>,
    spread: f64,
    ob_v1: &OrderBookTop,
    ob_v2: &OrderBookTop,
) -> HitRecord {
    HitRecord {
        ts,
        spread,
        ob_v1: *ob_v1,
        ob_v2: *ob_v2,
    }
}

fn make_pair(
    reason: ReasonTag,
    direction: Direction,
    size: f64,
    ob_v1: &OrderBookTop,
    ob_v2: &OrderBookTop,
) -> [Decision; 2] {
    let long_venue = reason.long_venue();
    let (ob_long, ob_short) = match long_venue {
        crate::models::Venue::V1 => (ob_v1, ob_v2),
        crate::models::Venue::V2 => (ob_v2, ob_v1),
    };
    [
        Decision::take(
            long_venue,
            Side::Long,
            reason,
            direction,
            size,
            ob_long.taker_price(Side::Long),
        ),
        Decision::take(
            reason.short_venue(),
            Side::Short,
            reason,
            direction,
            size,
            ob_short.taker_price(Side::Short),
        ),
    ]
}
