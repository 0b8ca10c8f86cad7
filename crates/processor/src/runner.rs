//! Level-agnostic tick loop. Each level's actions implement [`LevelActions`]
//! and the node wires them up from an explicit per-level table; the loop
//! itself knows nothing about what a level does.

use std::time::Duration;

use async_trait::async_trait;
use dragonnet_common::errors::DcResult;
use dragonnet_tasks::ShutdownGuard;
use tracing::*;

/// One level's block-production behavior. `execute` performs a full tick and
/// reports whether more work is already waiting, in which case the loop runs
/// again immediately instead of sleeping out the interval.
#[async_trait]
pub trait LevelActions: Send + Sync + 'static {
    fn level(&self) -> i64;

    async fn execute(&self) -> DcResult<bool>;
}

pub async fn run_actions_loop(
    actions: impl LevelActions,
    period: Duration,
    mut shutdown: ShutdownGuard,
) -> anyhow::Result<()> {
    let level = actions.level();
    info!(%level, "starting transaction processor");
    let interval = tokio::time::interval(period);
    tokio::pin!(interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.wait_for_shutdown() => {
                info!(%level, "transaction processor shutting down");
                return Ok(());
            }
        }

        loop {
            match actions.execute().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    // Tick-level failures are logged and the loop survives;
                    // anything unrecoverable has to escalate by panicking.
                    error!(%level, err = %e, "processor tick failed");
                    break;
                }
            }
        }
    }
}
