//! In-process paper venue.
//!
//! Backs the integration tests and the `--paper` dry-run mode: books and
//! account events are injected by the test (or generated by a deterministic
//! synthetic ticker), orders are recorded instead of routed, and fills can
//! be auto-echoed so a full entry/exit round-trip runs without a network.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{EngineEvent, FillEvent, OrderBookTop, PositionSnapshot, Side, Venue};
use crate::venues::{SendOutcome, VenueAdapter, VenueMeta};

/// Deterministic triangle-wave book generator for dry runs.
#[derive(Debug, Clone)]
pub struct SyntheticBook {
    pub mid: f64,
    pub half_spread: f64,
    pub depth: f64,
    pub amplitude: f64,
    pub period_ticks: u32,
    pub tick_ms: u64,
}

/// Order captured by the paper venue.
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub side: Side,
    pub size: f64,
    pub ref_price: f64,
}

#[derive(Default)]
struct Inner {
    slot: Option<Venue>,
    events: Option<mpsc::Sender<EngineEvent>>,
    orders: Vec<PaperOrder>,
    reject_next: Option<String>,
    /// Cumulative position maintained for auto-fill echoes.
    position: (f64, f64),
}

pub struct PaperVenue {
    meta: VenueMeta,
    initial_position: (f64, f64),
    /// Echo every accepted order back as a fill at its reference price.
    auto_fill: bool,
    synthetic: Option<SyntheticBook>,
    inner: Mutex<Inner>,
}

impl PaperVenue {
    pub fn new(meta: VenueMeta) -> Arc<Self> {
        Arc::new(PaperVenue {
            meta,
            initial_position: (0.0, 0.0),
            auto_fill: false,
            synthetic: None,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn with_options(
        meta: VenueMeta,
        initial_position: (f64, f64),
        auto_fill: bool,
        synthetic: Option<SyntheticBook>,
    ) -> Arc<Self> {
        Arc::new(PaperVenue {
            meta,
            initial_position,
            auto_fill,
            synthetic,
            inner: Mutex::new(Inner {
                position: initial_position,
                ..Inner::default()
            }),
        })
    }

    fn sender(&self) -> Result<(Venue, mpsc::Sender<EngineEvent>)> {
        let inner = self.inner.lock();
        match (inner.slot, inner.events.clone()) {
            (Some(slot), Some(tx)) => Ok((slot, tx)),
            _ => bail!("paper venue not subscribed"),
        }
    }

    /// Inject a top-of-book update.
    pub async fn push_book(&self, top: OrderBookTop) -> Result<()> {
        let (slot, tx) = self.sender()?;
        tx.send(EngineEvent::Ob(slot, top))
            .await
            .context("engine event channel closed")
    }

    pub async fn push_book_prices(
        &self,
        bid: f64,
        bid_size: f64,
        ask: f64,
        ask_size: f64,
    ) -> Result<()> {
        self.push_book(OrderBookTop {
            bid_price: bid,
            bid_size,
            ask_price: ask,
            ask_size,
            ts: Utc::now(),
        })
        .await
    }

    /// Inject a signed own-account fill delta.
    pub async fn push_fill(&self, delta: f64, price: Option<f64>) -> Result<()> {
        let (slot, tx) = self.sender()?;
        tx.send(EngineEvent::Fill(
            slot,
            FillEvent {
                delta,
                price,
                latency_ms: None,
            },
        ))
        .await
        .context("engine event channel closed")
    }

    /// Inject a position snapshot.
    pub async fn push_position(&self, qty: f64, entry: f64) -> Result<()> {
        let (slot, tx) = self.sender()?;
        tx.send(EngineEvent::Position(slot, PositionSnapshot { qty, entry }))
            .await
            .context("engine event channel closed")
    }

    /// Fail the next `send_market` with a venue rejection.
    pub fn reject_next(&self, resp: impl Into<String>) {
        self.inner.lock().reject_next = Some(resp.into());
    }

    /// Ask the engine to stop after draining everything queued so far.
    pub async fn push_shutdown(&self) -> Result<()> {
        let (_, tx) = self.sender()?;
        tx.send(EngineEvent::Shutdown)
            .await
            .context("engine event channel closed")
    }

    /// Block until the engine has subscribed this venue.
    pub async fn wait_subscribed(&self) {
        loop {
            if self.inner.lock().events.is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.inner.lock().orders.clone()
    }

    fn spawn_synthetic(&self, cfg: SyntheticBook, slot: Venue, tx: mpsc::Sender<EngineEvent>) {
        tokio::spawn(async move {
            let mut tick: u32 = 0;
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(cfg.tick_ms));
            loop {
                interval.tick().await;
                // triangle wave keeps the dry run deterministic
                let period = cfg.period_ticks.max(2);
                let phase = (tick % period) as f64 / period as f64;
                let tri = if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    3.0 - 4.0 * phase
                };
                let mid = cfg.mid + cfg.amplitude * tri;
                let top = OrderBookTop {
                    bid_price: mid - cfg.half_spread,
                    bid_size: cfg.depth,
                    ask_price: mid + cfg.half_spread,
                    ask_size: cfg.depth,
                    ts: Utc::now(),
                };
                if tx.send(EngineEvent::Ob(slot, top)).await.is_err() {
                    return;
                }
                tick = tick.wrapping_add(1);
            }
        });
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    fn meta(&self) -> VenueMeta {
        self.meta.clone()
    }

    async fn load_initial_position(&self) -> Result<(f64, f64)> {
        Ok(self.initial_position)
    }

    async fn subscribe(&self, slot: Venue, events: mpsc::Sender<EngineEvent>) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.slot = Some(slot);
            inner.events = Some(events.clone());
        }
        // account channel opens with the seeded position
        let (qty, entry) = self.initial_position;
        events
            .send(EngineEvent::Position(slot, PositionSnapshot { qty, entry }))
            .await
            .context("engine event channel closed")?;
        if let Some(cfg) = self.synthetic.clone() {
            self.spawn_synthetic(cfg, slot, events);
        }
        Ok(())
    }

    async fn send_market(&self, side: Side, size: f64, ref_price: f64) -> Result<SendOutcome> {
        let (slot, tx, rejection) = {
            let mut inner = self.inner.lock();
            let rejection = inner.reject_next.take();
            if rejection.is_none() {
                inner.orders.push(PaperOrder {
                    side,
                    size,
                    ref_price,
                });
            }
            (inner.slot, inner.events.clone(), rejection)
        };

        if let Some(resp) = rejection {
            return Ok(SendOutcome {
                status: "ERROR".to_string(),
                payload: Some(format!(
                    "{{\"side\":\"{}\",\"size\":{size},\"price\":{ref_price}}}",
                    side.as_str()
                )),
                resp: Some(resp),
            });
        }

        debug!(
            venue = %self.meta.name,
            side = side.as_str(),
            size,
            ref_price,
            "[PAPER ORDER]"
        );

        if self.auto_fill {
            if let (Some(slot), Some(tx)) = (slot, tx) {
                let delta = side.sign() * size;
                let (qty, entry) = {
                    let mut inner = self.inner.lock();
                    let mut qty = inner.position.0 + delta;
                    if qty.abs() < 1e-9 {
                        qty = 0.0;
                    }
                    let entry = if qty == 0.0 { 0.0 } else { ref_price };
                    inner.position = (qty, entry);
                    inner.position
                };
                let _ = tx
                    .send(EngineEvent::Fill(
                        slot,
                        FillEvent {
                            delta,
                            price: Some(ref_price),
                            latency_ms: None,
                        },
                    ))
                    .await;
                // echo the account stream's follow-up snapshot as well
                let _ = tx
                    .send(EngineEvent::Position(slot, PositionSnapshot { qty, entry }))
                    .await;
            }
        }

        Ok(SendOutcome::ok(
            format!(
                "{{\"side\":\"{}\",\"size\":{size},\"price\":{ref_price}}}",
                side.as_str()
            ),
            "accepted",
        ))
    }
}
