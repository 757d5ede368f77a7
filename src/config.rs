//! Runtime configuration: a JSON document enumerating trading pairs, plus
//! environment for secrets. Thresholds that would make trading impossible
//! are rejected up front instead of silently producing a bot that never
//! fires (or worse, fires wrong).

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::state::MAX_MIN_HITS;
use crate::venues::VenueMeta;

fn default_min_hits() -> u32 {
    3
}

fn default_max_of_ob() -> f64 {
    0.3
}

fn default_slippage() -> f64 {
    0.04
}

/// Options for one engine instance. Field names match the operator-facing
/// JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairConfig {
    #[serde(rename = "SYM_V1")]
    pub sym_v1: String,
    #[serde(rename = "SYM_V2")]
    pub sym_v2: String,
    #[serde(rename = "VENUE1")]
    pub venue1: String,
    #[serde(rename = "VENUE2")]
    pub venue2: String,
    /// Entry threshold in percent.
    #[serde(rename = "MIN_SPREAD")]
    pub min_spread: f64,
    /// Take-profit threshold on the inverse spread, in percent.
    #[serde(rename = "SPREAD_TP")]
    pub spread_tp: f64,
    #[serde(rename = "MIN_HITS", default = "default_min_hits")]
    pub min_hits: u32,
    /// `None` = uncapped; 0 blocks all entries.
    #[serde(rename = "MAX_POSITION_VALUE", default)]
    pub max_position_value: Option<f64>,
    #[serde(rename = "MAX_TRADE_VALUE", default)]
    pub max_trade_value: Option<f64>,
    #[serde(rename = "MAX_OF_OB", default = "default_max_of_ob")]
    pub max_of_ob: f64,
    /// Cap on fired signals; `None` = unlimited.
    #[serde(rename = "MAX_TRADES", default)]
    pub max_trades: Option<i64>,
    #[serde(rename = "DEDUP_OB", default)]
    pub dedup_ob: bool,
    #[serde(rename = "WARM_UP_ORDERS", default)]
    pub warm_up_orders: bool,
    #[serde(rename = "SLIPPAGE", default = "default_slippage")]
    pub slippage: f64,
}

impl PairConfig {
    pub fn bot_id(&self) -> String {
        format!("TT:{}:{}", self.sym_v1, self.sym_v2)
    }

    /// Consecutive-hit requirement, clamped to the supported window.
    pub fn min_hits(&self) -> usize {
        (self.min_hits as usize).clamp(1, MAX_MIN_HITS)
    }

    /// Checks that need no venue metadata.
    pub fn validate(&self) -> Result<()> {
        if !(self.max_of_ob >= 0.0 && self.max_of_ob <= 1.0) {
            bail!(
                "{}: MAX_OF_OB must be within 0..1, got {}",
                self.bot_id(),
                self.max_of_ob
            );
        }
        if !self.min_spread.is_finite() || !self.spread_tp.is_finite() {
            bail!("{}: MIN_SPREAD/SPREAD_TP must be finite", self.bot_id());
        }
        if !(self.slippage >= 0.0 && self.slippage < 1.0) {
            bail!("{}: SLIPPAGE must be within 0..1, got {}", self.bot_id(), self.slippage);
        }
        if let Some(v) = self.max_trade_value {
            if v <= 0.0 {
                bail!("{}: MAX_TRADE_VALUE must be positive when set", self.bot_id());
            }
        }
        Ok(())
    }

    /// Checks against venue metadata, once the adapters have it. A dollar cap
    /// below a venue's notional floor can never size a trade.
    pub fn validate_against_meta(&self, meta_v1: &VenueMeta, meta_v2: &VenueMeta) -> Result<()> {
        if let Some(cap) = self.max_trade_value {
            for meta in [meta_v1, meta_v2] {
                if meta.min_notional > 0.0 && cap < meta.min_notional {
                    bail!(
                        "{}: MAX_TRADE_VALUE ({cap}) below {} min_notional ({})",
                        self.bot_id(),
                        meta.name,
                        meta.min_notional
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    pairs: Vec<PairConfig>,
}

/// Fully resolved process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pairs: Vec<PairConfig>,
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Load the pair document from `path` and secrets from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        if file.pairs.is_empty() {
            bail!("config {} lists no pairs", path.display());
        }
        for pair in &file.pairs {
            pair.validate()?;
        }
        Ok(AppConfig {
            pairs: file.pairs,
            database_url: std::env::var("DATABASE_URL").ok(),
        })
    }
}
