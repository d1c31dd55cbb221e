use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::{KnowledgeEngine, Sweep};
use crate::store::Store;

/// Run every sweep in its own task so a slow peer only delays its own sweep
pub fn spawn_sweeps<S: Store + 'static>(engine: Arc<KnowledgeEngine<S>>, interval: Duration) -> Vec<JoinHandle<()>> {
    Sweep::ALL
        .into_iter()
        .map(|sweep| spawn_sweep(engine.clone(), sweep, interval))
        .collect()
}

pub fn spawn_sweep<S: Store + 'static>(engine: Arc<KnowledgeEngine<S>>, sweep: Sweep, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!("Sweep {} every {:?}", sweep, interval);
        loop {
            ticker.tick().await;
            match engine.run_sweep(sweep).await {
                Ok(report) if report.attempted > 0 => log::info!(
                    "Sweep {}: {} attempted, {} succeeded, {} failed",
                    sweep,
                    report.attempted,
                    report.succeeded,
                    report.failed
                ),
                Ok(_) => log::debug!("Sweep {}: nothing to do", sweep),
                Err(e) => log::error!("Sweep {} failed: {}", sweep, e),
            }
        }
    })
}
