// The scheduled entry point: harvest-and-reconcile cycles on a fixed
// period. Nothing a cycle does is allowed to take the loop down.

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use crate::harvester::Harvester;
use crate::reconcile::{EventStore, Reconciler};

/// One full harvest-and-reconcile cycle.
pub async fn run_cycle(harvester: &mut Harvester, store: &dyn EventStore) -> Result<()> {
    let (events, stats) = harvester.harvest().await;
    info!("{stats}");

    let reconciled = Reconciler::new(store).upsert(events).await?;
    info!("{reconciled}");
    Ok(())
}

/// Re-index forever on a fixed period. A failed cycle is logged and the
/// next one still runs. Shutdown is honored between cycles; a cycle in
/// progress always runs to completion.
pub async fn run_forever(harvester: &mut Harvester, store: &dyn EventStore, period: Duration) {
    loop {
        if let Err(e) = run_cycle(harvester, store).await {
            error!(error = ?e, "harvest cycle failed, continuing with the next one");
        }

        info!(minutes = period.as_secs() / 60, "sleeping until the next cycle");
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, exiting between cycles");
                break;
            }
        }
    }
}
