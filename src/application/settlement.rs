use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::LedgerService;

/// Background task that periodically runs settlement passes until shut down.
pub struct SettlementWorker {
    service: Arc<LedgerService>,
    interval: Duration,
}

/// Handle to a running [`SettlementWorker`].
pub struct SettlementHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SettlementWorker {
    pub fn new(service: Arc<LedgerService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn spawn(self) -> SettlementHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            info!(interval_ms = self.interval.as_millis() as u64, "settlement worker started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.service.process_settlements(Utc::now()).await {
                            Ok(report) if !report.is_empty() => {
                                info!(
                                    confirmed = report.confirmed.len(),
                                    failed = report.failed.len(),
                                    "settlement pass"
                                );
                            }
                            Ok(_) => {}
                            // Transient storage errors are retried on the next tick
                            Err(err) => warn!(error = %err, "settlement pass failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("settlement worker stopped");
        });

        SettlementHandle { shutdown, task }
    }
}

impl SettlementHandle {
    /// Signal the worker to stop and wait for the current pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
