//! Sizing engine: one shared size for both legs of a paired order.
//!
//! Both legs always trade the identical quantity. When a venue constraint
//! cannot be met at the depth-capped size, the answer is 0 ("do not trade")
//! rather than a clamped size that would break leg symmetry.

use crate::models::{OrderBookTop, ReasonTag};
use crate::venues::VenueMeta;

/// Guard against FP drift when snapping to a size increment.
const STEP_EPS: f64 = 1e-9;

pub struct SizingParams<'a> {
    pub ob_v1: &'a OrderBookTop,
    pub ob_v2: &'a OrderBookTop,
    pub meta_v1: &'a VenueMeta,
    pub meta_v2: &'a VenueMeta,
    /// Fraction of the thinner top-of-book side the pair may consume (0..1).
    pub max_of_ob: f64,
    /// Per-leg dollar cap; `None` = uncapped.
    pub max_trade_value: Option<f64>,
    /// Multiplicative margin applied to the aggressive reference price.
    pub slippage: f64,
}

/// Compute the shared paired-leg size for `reason`. Returns 0 when the
/// signal should be abandoned.
///
/// Order of constraints: depth cap, per-leg notional floor, dollar cap,
/// step snap (ceil, coarsest increment of the two venues), min-size floor.
/// The snap rounds up so the result never undershoots the depth-capped
/// estimate; a dollar-cap breach caused purely by the snap is accepted.
pub fn shared_pair_size(reason: ReasonTag, p: &SizingParams<'_>) -> f64 {
    let long_venue = reason.long_venue();
    let (ob_long, ob_short, meta_long, meta_short) = match long_venue {
        crate::models::Venue::V1 => (p.ob_v1, p.ob_v2, p.meta_v1, p.meta_v2),
        crate::models::Venue::V2 => (p.ob_v2, p.ob_v1, p.meta_v2, p.meta_v1),
    };

    // 1) depth cap
    if p.max_of_ob <= 0.0 {
        return 0.0;
    }
    let depth = f64::min(ob_long.ask_size, ob_short.bid_size);
    if depth <= 0.0 {
        return 0.0;
    }
    let mut shared = p.max_of_ob * depth;

    // 2) notional floors at slippage-adjusted execution prices
    let exec_long = ob_long.ask_price * (1.0 + p.slippage);
    let exec_short = ob_short.bid_price * (1.0 - p.slippage);
    if exec_long <= 0.0 || exec_short <= 0.0 {
        return 0.0;
    }
    if meta_long.min_notional > 0.0 && exec_long * shared < meta_long.min_notional {
        return 0.0;
    }
    if meta_short.min_notional > 0.0 && exec_short * shared < meta_short.min_notional {
        return 0.0;
    }

    // 3) dollar cap, per venue-indexed execution price
    if let Some(cap) = p.max_trade_value {
        let (exec_v1, exec_v2) = match long_venue {
            crate::models::Venue::V1 => (exec_long, exec_short),
            crate::models::Venue::V2 => (exec_short, exec_long),
        };
        shared = shared.min(cap / exec_v1).min(cap / exec_v2);
    }

    // 4) snap up to the coarsest size increment of the two venues
    let step = f64::max(p.meta_v1.size_step, p.meta_v2.size_step);
    if step > 0.0 {
        shared = ((shared / step) - STEP_EPS).ceil() * step;
    }

    // 5) min-size floors
    if shared + STEP_EPS < meta_long.min_size || shared + STEP_EPS < meta_short.min_size {
        return 0.0;
    }
    if shared <= 0.0 {
        return 0.0;
    }
    shared
}
