// Background task that keeps the simulated delivery layer moving

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinError, JoinHandle};

use crate::simulation::network::{Network, RelayReport};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayerStats {
    pub rounds: u64,
    pub delivered: usize,
    pub rejected: usize,
    pub duplicates: usize,
}

impl RelayerStats {
    fn record(&mut self, report: &RelayReport) {
        self.rounds += 1;
        self.delivered += report.delivered.len();
        self.rejected += report.rejected.len();
        self.duplicates += report.duplicates;
    }
}

pub struct RelayerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<RelayerStats>,
}

impl RelayerHandle {
    /// Stops the relayer after its current round and returns what it did.
    pub async fn shutdown(mut self) -> Result<RelayerStats, JoinError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task.await
    }
}

/// Runs one relay round per tick. Each round holds the network lock, so chain
/// operations from other tasks interleave only between rounds.
pub fn spawn_relayer(network: Arc<Mutex<Network>>, tick: Duration) -> RelayerHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        let mut stats = RelayerStats::default();
        let mut interval = tokio::time::interval(tick);
        info!("Relayer started (tick {:?})", tick);
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = interval.tick() => {
                    let report = network.lock().await.relay_once();
                    if !report.delivered.is_empty() || !report.rejected.is_empty() {
                        debug!(
                            "Relayer round {}: {} delivered, {} rejected, {} stuck",
                            stats.rounds + 1,
                            report.delivered.len(),
                            report.rejected.len(),
                            report.stuck.len()
                        );
                    }
                    stats.record(&report);
                }
            }
        }
        info!("Relayer stopped after {} rounds", stats.rounds);
        stats
    });
    RelayerHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}
