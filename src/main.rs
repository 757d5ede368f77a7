//! Basisbot — cross-venue perpetual-futures arbitrage engine.
//!
//! Connects to two perpetual-futures venues for the same underlying, tracks
//! top-of-book on both, and fires paired market orders when the price gap
//! clears the configured threshold: long the cheap venue, short the rich
//! one, unwound when the inverse spread clears take-profit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use basisbot::config::{AppConfig, PairConfig};
use basisbot::supervisor::{self, AdapterFactory};
use basisbot::venues::paper::{PaperVenue, SyntheticBook};
use basisbot::venues::{VenueAdapter, VenueMeta};

#[derive(Parser, Debug)]
#[command(name = "basisbot", about = "Cross-venue perpetual-futures arbitrage engine")]
struct Cli {
    /// Pair configuration document
    #[arg(long, default_value = "config.json", env = "BASISBOT_CONFIG")]
    config: PathBuf,

    /// Only run pairs whose bot id contains this substring
    #[arg(long)]
    pair: Option<String>,

    /// Force in-process paper venues with a synthetic feed (dry run)
    #[arg(long)]
    paper: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "basisbot=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut cfg = AppConfig::load(&cli.config)?;
    if let Some(filter) = &cli.pair {
        cfg.pairs.retain(|p| p.bot_id().contains(filter.as_str()));
        if cfg.pairs.is_empty() {
            bail!("no configured pair matches filter '{filter}'");
        }
    }
    info!(
        pairs = cfg.pairs.len(),
        trace_store = cfg.database_url.is_some(),
        "basisbot starting"
    );

    let paper = cli.paper;
    let factory: AdapterFactory = Arc::new(move |pair| build_adapters(pair, paper));
    supervisor::run(cfg, factory).await
}

/// Resolve the two adapters for a pair. This build links the paper venue
/// only; live exchange adapters implement [`VenueAdapter`] out of tree and
/// register here by venue name.
fn build_adapters(
    pair: &PairConfig,
    force_paper: bool,
) -> Result<(Arc<dyn VenueAdapter>, Arc<dyn VenueAdapter>)> {
    let build = |venue_name: &str, sym: &str, synthetic: SyntheticBook| -> Result<Arc<dyn VenueAdapter>> {
        if force_paper || venue_name == "paper" {
            let meta = VenueMeta {
                name: format!("paper:{sym}"),
                min_size: 0.001,
                min_notional: 0.0,
                size_step: 0.001,
                price_step: 0.1,
                size_decimals: 3,
                price_decimals: 1,
            };
            Ok(PaperVenue::with_options(meta, (0.0, 0.0), true, Some(synthetic)))
        } else {
            bail!("unknown venue adapter '{venue_name}' (this build ships 'paper' only)")
        }
    };

    // slightly offset mids and incommensurate periods so the paper spread
    // drifts in and out of the firing band
    let v1 = build(
        &pair.venue1,
        &pair.sym_v1,
        SyntheticBook {
            mid: 100.0,
            half_spread: 0.05,
            depth: 1.0,
            amplitude: 0.35,
            period_ticks: 40,
            tick_ms: 200,
        },
    )?;
    let v2 = build(
        &pair.venue2,
        &pair.sym_v2,
        SyntheticBook {
            mid: 100.45,
            half_spread: 0.05,
            depth: 1.0,
            amplitude: 0.35,
            period_ticks: 56,
            tick_ms: 230,
        },
    )?;
    Ok((v1, v2))
}
