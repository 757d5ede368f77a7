//! Per-pair arbitrage execution engine.
//!
//! `coordinator` drives the loop; `spreads`, `decision` and `sizing` are the
//! pure pieces it calls on every book tick; `state` is the mutable record it
//! owns; `books` holds the sanitized market snapshots; `audit` renders what
//! a finished trade leaves behind.

pub mod audit;
pub mod books;
pub mod coordinator;
pub mod decision;
pub mod sizing;
pub mod spreads;
pub mod state;

pub use coordinator::Engine;
