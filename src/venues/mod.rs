//! Venue adapter seam.
//!
//! The engine talks to a venue exclusively through [`VenueAdapter`]: stream
//! top-of-book and account events into the engine's channel, fetch the
//! initial position once, submit aggressive orders, expose trading metadata.
//! Live exchange glue implements this trait out of tree; the in-tree
//! [`paper::PaperVenue`] backs tests and dry runs.

pub mod paper;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{EngineEvent, Side, Venue};

/// Trading constraints a venue publishes for one instrument. Must be
/// populated before the engine makes its first decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueMeta {
    pub name: String,
    pub min_size: f64,
    pub min_notional: f64,
    pub size_step: f64,
    pub price_step: f64,
    pub size_decimals: u32,
    pub price_decimals: u32,
}

/// Result of a market-order submission. A non-OK status is a venue
/// rejection; transport failures surface as `Err` from `send_market`.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub status: String,
    pub payload: Option<String>,
    pub resp: Option<String>,
}

impl SendOutcome {
    pub fn ok(payload: impl Into<String>, resp: impl Into<String>) -> Self {
        SendOutcome {
            status: "OK".to_string(),
            payload: Some(payload.into()),
            resp: Some(resp.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }
}

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Trading metadata for the instrument this adapter serves.
    fn meta(&self) -> VenueMeta;

    /// One-shot position fetch before streaming begins: `(qty, avg_entry)`.
    async fn load_initial_position(&self) -> Result<(f64, f64)>;

    /// Start the adapter's stream tasks. Top-of-book, own-account fills and
    /// position snapshots are pushed into `events` tagged with `slot`;
    /// reconnects happen inside the adapter with exponential backoff.
    async fn subscribe(&self, slot: Venue, events: mpsc::Sender<EngineEvent>) -> Result<()>;

    /// Submit an aggressive order at `ref_price` (already slippage-adjusted).
    /// No engine-side retry: the order was accepted, rejected, or lost.
    async fn send_market(&self, side: Side, size: f64, ref_price: f64) -> Result<SendOutcome>;
}
