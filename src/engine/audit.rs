//! Audit formatter: the canonical strings and JSON payloads a finished trade
//! leaves behind — inventory blocks, filled spread, per-leg slippage and the
//! one-line audit record.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::engine::state::InvSnapshot;
use crate::models::{Direction, ReasonTag, Side, TraceId, Venue};

/// `V1:<qty>@<entry> | V2:<qty>@<entry> | Δ -> <inv spread>%`
pub fn inventory_block(s: &InvSnapshot) -> String {
    format!(
        "V1:{}@{} | V2:{}@{} | Δ -> {:.2}%",
        s.qty_v1,
        fmt_price(s.entry_v1),
        s.qty_v2,
        fmt_price(s.entry_v2),
        crate::engine::spreads::inventory_spread(s.qty_v1, s.entry_v1, s.qty_v2, s.entry_v2),
    )
}

/// JSON form of an inventory snapshot for the trace sections.
pub fn inv_json(s: &InvSnapshot) -> Value {
    json!([
        { "venue": "V1", "qty": s.qty_v1, "price": s.entry_v1 },
        { "venue": "V2", "qty": s.qty_v2, "price": s.entry_v2 },
    ])
}

/// Realized spread computed from actual fill prices, in percent.
pub fn filled_spread(reason: ReasonTag, fill_v1: Option<f64>, fill_v2: Option<f64>) -> Option<f64> {
    let f1 = fill_v1.filter(|v| *v > 0.0)?;
    let f2 = fill_v2.filter(|v| *v > 0.0)?;
    match reason {
        ReasonTag::Tt12 | ReasonTag::Warmup12 => Some((f2 - f1) / f1 * 100.0),
        ReasonTag::Tt21 | ReasonTag::Warmup21 => Some((f1 - f2) / f2 * 100.0),
    }
}

/// Per-leg slippage in percent; positive means the fill was worse than the
/// decision-time book (paid up on the long, sold down on the short is
/// negative — selling above the bid reads positive).
pub fn leg_slippage(side: Side, ob_price: f64, fill_price: f64) -> Option<f64> {
    if ob_price <= 0.0 || fill_price <= 0.0 {
        return None;
    }
    Some(match side {
        Side::Long => (fill_price - ob_price) / ob_price * 100.0,
        Side::Short => (ob_price - fill_price) / ob_price * 100.0,
    })
}

/// Everything the audit line and the final `decision_data` section need for
/// one leg, keyed long/short rather than by venue.
#[derive(Debug, Clone)]
pub struct LegAudit {
    pub venue: Venue,
    pub side: Side,
    pub ob_price: f64,
    pub exec_price: Option<f64>,
    pub fill_price: Option<f64>,
    pub lat_order_ms: Option<f64>,
    pub lat_fill_ms: Option<f64>,
}

impl LegAudit {
    pub fn slippage(&self) -> Option<f64> {
        leg_slippage(self.side, self.ob_price, self.fill_price?)
    }
}

/// Complete per-trade audit record, rendered once at finalize time.
#[derive(Debug, Clone)]
pub struct TradeAudit {
    pub ts: DateTime<Utc>,
    pub reason: ReasonTag,
    pub direction: Direction,
    pub qty: f64,
    pub spread_signal: Option<f64>,
    pub spread_filled: Option<f64>,
    pub inv_before: InvSnapshot,
    pub inv_after: InvSnapshot,
    pub long_leg: LegAudit,
    pub short_leg: LegAudit,
}

impl TradeAudit {
    /// One audit line: timestamp, reason/direction, qty, signal vs filled
    /// spread, inventory before/after, then both legs long-first.
    pub fn line(&self) -> String {
        format!(
            "{},{},{},{},{},{},\"{}\",\"{}\",{},{}",
            self.ts.format("%Y-%m-%dT%H:%M:%S"),
            self.reason.as_str(),
            self.direction.as_str(),
            self.qty,
            fmt_pct(self.spread_signal),
            fmt_pct(self.spread_filled),
            inventory_block(&self.inv_before),
            inventory_block(&self.inv_after),
            leg_csv(&self.long_leg),
            leg_csv(&self.short_leg),
        )
    }

    /// The `decision_data` trace section.
    pub fn decision_data(&self, trace: &TraceId) -> Value {
        json!({
            "trace": trace.as_str(),
            "ts": self.ts.to_rfc3339(),
            "reason": self.reason.as_str(),
            "direction": self.direction.as_str(),
            "qty": self.qty,
            "spread_signal": self.spread_signal,
            "spread_filled": self.spread_filled,
            "inv_before": inv_json(&self.inv_before),
            "inv_after": inv_json(&self.inv_after),
            "legs": {
                "long": leg_json(&self.long_leg),
                "short": leg_json(&self.short_leg),
            },
        })
    }
}

fn leg_csv(leg: &LegAudit) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        leg.venue.as_str(),
        fmt_price(leg.ob_price),
        leg.exec_price.map(fmt_price).unwrap_or_default(),
        leg.fill_price.map(fmt_price).unwrap_or_default(),
        fmt_lat(leg.lat_order_ms),
        fmt_lat(leg.lat_fill_ms),
        leg.slippage().map(|s| format!("{s:.2}")).unwrap_or_default(),
    )
}

fn leg_json(leg: &LegAudit) -> Value {
    json!({
        "venue": leg.venue.as_str(),
        "side": leg.side.as_str(),
        "ob_price": leg.ob_price,
        "exec_price": leg.exec_price,
        "fill_price": leg.fill_price,
        "lat_order_ms": leg.lat_order_ms,
        "lat_fill_ms": leg.lat_fill_ms,
        "slippage_pct": leg.slippage(),
    })
}

fn fmt_price(v: f64) -> String {
    format!("{v:.6}")
}

fn fmt_pct(v: Option<f64>) -> String {
    v.map(|p| format!("{p:.2}")).unwrap_or_default()
}

fn fmt_lat(v: Option<f64>) -> String {
    v.map(|l| format!("{l:.0}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(q1: f64, e1: f64, q2: f64, e2: f64) -> InvSnapshot {
        InvSnapshot {
            qty_v1: q1,
            entry_v1: e1,
            qty_v2: q2,
            entry_v2: e2,
        }
    }

    #[test]
    fn filled_spread_by_direction() {
        let v = filled_spread(ReasonTag::Tt12, Some(100.0), Some(100.5)).unwrap();
        assert!((v - 0.5).abs() < 1e-9);
        let v = filled_spread(ReasonTag::Tt21, Some(100.5), Some(100.0)).unwrap();
        assert!((v - 0.5).abs() < 1e-9);
        assert!(filled_spread(ReasonTag::Tt12, None, Some(100.0)).is_none());
    }

    #[test]
    fn slippage_signs() {
        // long leg paid up
        let v = leg_slippage(Side::Long, 100.0, 100.2).unwrap();
        assert!((v - 0.2).abs() < 1e-9);
        // short leg sold below the decision-time bid
        let v = leg_slippage(Side::Short, 100.0, 99.8).unwrap();
        assert!((v - 0.2).abs() < 1e-9);
        // short leg filled above the bid reads negative (improvement)
        let v = leg_slippage(Side::Short, 100.0, 100.1).unwrap();
        assert!(v < 0.0);
    }

    #[test]
    fn inventory_block_shows_locked_spread() {
        let s = snap(0.12, 100.1, -0.12, 100.6);
        let line = inventory_block(&s);
        assert!(line.starts_with("V1:0.12@100.100000 | V2:-0.12@100.600000"));
        assert!(line.ends_with("0.50%"));
    }

    #[test]
    fn audit_line_orders_legs_long_first() {
        let audit = TradeAudit {
            ts: Utc::now(),
            reason: ReasonTag::Tt21,
            direction: Direction::Exit,
            qty: 0.12,
            spread_signal: Some(0.80),
            spread_filled: Some(0.74),
            inv_before: snap(0.12, 100.1, -0.12, 100.6),
            inv_after: snap(0.0, 0.0, 0.0, 0.0),
            long_leg: LegAudit {
                venue: Venue::V2,
                side: Side::Long,
                ob_price: 100.1,
                exec_price: Some(104.1),
                fill_price: Some(100.2),
                lat_order_ms: Some(12.0),
                lat_fill_ms: Some(80.0),
            },
            short_leg: LegAudit {
                venue: Venue::V1,
                side: Side::Short,
                ob_price: 100.9,
                exec_price: Some(96.9),
                fill_price: Some(100.8),
                lat_order_ms: Some(15.0),
                lat_fill_ms: Some(95.0),
            },
        };
        let line = audit.line();
        // the TT_21 long leg is the V2 leg
        let long_pos = line.find(",V2,").unwrap();
        let short_pos = line.find(",V1,").unwrap();
        assert!(long_pos < short_pos);
        assert!(line.contains("TT_21,exit,0.12,0.80,0.74"));

        let data = audit.decision_data(&TraceId::generate());
        assert_eq!(data["legs"]["long"]["venue"], "V2");
        assert_eq!(data["reason"], "TT_21");
        assert_eq!(data["inv_before"][0]["venue"], "V1");
    }
}
