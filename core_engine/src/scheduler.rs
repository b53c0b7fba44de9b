//! Periodic reconciliation driver.
//!
//! Every scan interval, one pass reconciles all known interfaces
//! concurrently (each under its own interface lock). A pass already in
//! flight when shutdown is requested runs to completion, so the store is
//! never left mid-tick.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::reconcile;

/// Run the scheduler until `shutdown` flips to `true`.
pub async fn run(ctx: Arc<EngineContext>, mut shutdown: watch::Receiver<bool>) {
    let interval = ctx.config.engine.scan_interval();
    info!(interval_secs = interval.as_secs(), "scheduler started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        // Awaited outside the select: shutdown never cancels a pass
        run_pass(&ctx).await;
    }

    info!("scheduler stopped");
}

/// One reconciliation pass over every known interface.
pub async fn run_pass(ctx: &Arc<EngineContext>) {
    let interfaces = match ctx.known_interfaces() {
        Ok(list) => list,
        Err(error) => {
            error!(%error, "failed to list interfaces, skipping pass");
            return;
        }
    };

    if interfaces.is_empty() {
        debug!("no interfaces configured");
        return;
    }

    let mut passes = JoinSet::new();
    for interface in interfaces {
        let ctx = Arc::clone(ctx);
        passes.spawn(async move {
            let outcome = reconcile::reconcile_interface(&ctx, &interface).await;
            (interface, outcome)
        });
    }

    while let Some(joined) = passes.join_next().await {
        match joined {
            Ok((interface, Ok(()))) => debug!(interface, "reconciled"),
            Ok((interface, Err(error))) => {
                warn!(interface, %error, "reconciliation failed, will retry next pass");
            }
            Err(join_error) => error!(%join_error, "reconciliation task panicked"),
        }
    }
}
