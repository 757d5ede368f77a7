//! Spread calculator: two sanitized books plus inventory state in, the full
//! `SpreadSet` out, in percent.

use crate::engine::state::EngineState;
use crate::models::{OrderBookTop, SpreadSet};

fn pct(numer: f64, base: f64) -> Option<f64> {
    if base > 0.0 {
        Some((numer - base) / base * 100.0)
    } else {
        None
    }
}

/// Compute the six directional spreads and the inventory spread.
///
/// `tt_12 = (bid_V2 − ask_V1) / ask_V1 × 100` — the edge captured by buying
/// V1 at the ask and selling V2 at the bid; `tt_21` mirrors it. The MT/TM
/// variants are carried for logs and trace rows only. `inv` values the
/// currently held paired inventory off its entry prices and is 0 when flat
/// or when the two legs do not oppose each other.
pub fn calc_spreads(ob_v1: &OrderBookTop, ob_v2: &OrderBookTop, state: &EngineState) -> SpreadSet {
    let (b1, a1) = (ob_v1.bid_price, ob_v1.ask_price);
    let (b2, a2) = (ob_v2.bid_price, ob_v2.ask_price);

    let inv = inventory_spread(
        state.v1.inv_qty,
        state.v1.entry_price,
        state.v2.inv_qty,
        state.v2.entry_price,
    );

    SpreadSet {
        tt_12: pct(b2, a1),
        tt_21: pct(b1, a2),
        mt_12: pct(b2, b1),
        mt_21: pct(b1, b2),
        tm_12: pct(a2, a1),
        tm_21: pct(a1, a2),
        inv,
    }
}

/// Unrealized spread locked into opposing inventory, off entry prices.
pub fn inventory_spread(qty_v1: f64, entry_v1: f64, qty_v2: f64, entry_v2: f64) -> f64 {
    if qty_v1 > 0.0 && qty_v2 < 0.0 && entry_v1 > 0.0 {
        (entry_v2 - entry_v1) / entry_v1 * 100.0
    } else if qty_v1 < 0.0 && qty_v2 > 0.0 && entry_v2 > 0.0 {
        (entry_v1 - entry_v2) / entry_v2 * 100.0
    } else {
        0.0
    }
}
