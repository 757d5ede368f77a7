//! Pair supervisor: one engine task per configured pair.
//!
//! Engine crashes and panics restart the pair with capped exponential
//! backoff; configuration that can never trade is fatal and takes the
//! process down instead of retry-looping forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, warn};

use crate::config::{AppConfig, PairConfig};
use crate::engine::Engine;
use crate::trace::TraceWriter;
use crate::venues::VenueAdapter;

const RESTART_DELAY_INITIAL: Duration = Duration::from_secs(1);
const RESTART_DELAY_MAX: Duration = Duration::from_secs(30);

/// An engine run shorter than this keeps escalating the restart delay.
const STABLE_RUN: Duration = Duration::from_secs(60);

/// Builds the two venue adapters for a pair.
pub type AdapterFactory = Arc<
    dyn Fn(&PairConfig) -> Result<(Arc<dyn VenueAdapter>, Arc<dyn VenueAdapter>)> + Send + Sync,
>;

/// Run every configured pair to completion.
pub async fn run(cfg: AppConfig, factory: AdapterFactory) -> Result<()> {
    let mut handles = Vec::new();
    for pair in cfg.pairs.clone() {
        let factory = factory.clone();
        let dsn = cfg.database_url.clone();
        let bot = pair.bot_id();
        info!("[SUPERVISOR] starting {bot}");
        handles.push(tokio::spawn(supervise_pair(pair, dsn, factory)));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| anyhow!("supervisor task panicked: {e}"))??;
    }
    Ok(())
}

async fn supervise_pair(
    pair: PairConfig,
    dsn: Option<String>,
    factory: AdapterFactory,
) -> Result<()> {
    let bot = pair.bot_id();
    let mut delay = RESTART_DELAY_INITIAL;
    loop {
        let (v1, v2) = factory(&pair)
            .with_context(|| format!("building venue adapters for {bot}"))?;
        let writer = Arc::new(TraceWriter::new(dsn.clone(), pair.bot_id()));
        // construction failure means the pair can never trade: fatal
        let mut engine = Engine::new(pair.clone(), v1, v2, writer)
            .with_context(|| format!("initializing engine for {bot}"))?;

        let started = Instant::now();
        let run = tokio::spawn(async move { engine.run().await });
        match run.await {
            Ok(Ok(())) => {
                info!("[SUPERVISOR] {bot} engine stopped cleanly");
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(error = %e, "[SUPERVISOR] {bot} engine errored; restarting");
            }
            Err(join_err) => {
                error!("[SUPERVISOR] {bot} engine panicked: {join_err}; restarting");
            }
        }

        if started.elapsed() >= STABLE_RUN {
            delay = RESTART_DELAY_INITIAL;
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(RESTART_DELAY_MAX);
    }
}
