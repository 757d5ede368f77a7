//! Latest sanitized top-of-book per venue.
//!
//! Feeds occasionally deliver transiently inverted books; those are swapped
//! back on ingest. Updates missing a strictly positive price on either side
//! are dropped. With `dedup_ob` on, an update identical to the last published
//! tuple for that venue is suppressed so the decision loop is not re-run for
//! a no-op tick.

use tracing::warn;

use crate::models::{OrderBookTop, Venue};

/// Outcome of feeding one update into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookUpdate {
    Accepted,
    Duplicate,
    Rejected,
}

#[derive(Debug)]
pub struct BookSet {
    dedup_ob: bool,
    v1: Option<OrderBookTop>,
    v2: Option<OrderBookTop>,
}

impl BookSet {
    pub fn new(dedup_ob: bool) -> Self {
        BookSet {
            dedup_ob,
            v1: None,
            v2: None,
        }
    }

    pub fn apply(&mut self, venue: Venue, mut top: OrderBookTop) -> BookUpdate {
        if top.bid_price > top.ask_price {
            std::mem::swap(&mut top.bid_price, &mut top.ask_price);
            std::mem::swap(&mut top.bid_size, &mut top.ask_size);
        }
        if !(top.bid_price > 0.0 && top.ask_price > 0.0) {
            warn!(venue = venue.as_str(), ?top, "[OB DROPPED] non-positive price");
            return BookUpdate::Rejected;
        }

        let slot = match venue {
            Venue::V1 => &mut self.v1,
            Venue::V2 => &mut self.v2,
        };
        if self.dedup_ob {
            if let Some(prev) = slot {
                if prev.dedup_key() == top.dedup_key() {
                    return BookUpdate::Duplicate;
                }
            }
        }
        *slot = Some(top);
        BookUpdate::Accepted
    }

    pub fn get(&self, venue: Venue) -> Option<&OrderBookTop> {
        match venue {
            Venue::V1 => self.v1.as_ref(),
            Venue::V2 => self.v2.as_ref(),
        }
    }

    /// Both books, once each venue has delivered at least one valid snapshot.
    pub fn both(&self) -> Option<(&OrderBookTop, &OrderBookTop)> {
        match (&self.v1, &self.v2) {
            (Some(a), Some(b)) => Some((a, b)),
            _ => None,
        }
    }
}
