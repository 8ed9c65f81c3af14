//! Periodic reconciliation: a backstop for pushes the live channel missed.
//!
//! Each tick runs `NotificationStore::refresh`, so polled snapshots go
//! through the same idempotent merge as everything else.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::{NotificationApi, NotificationStore, RefreshOutcome, StoreError};
use crate::transport::TransportError;

/// Running reconciliation task. Dropping it aborts the task.
pub struct ReconcileHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl ReconcileHandle {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop after the in-flight refresh, if any, completes.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ReconcileHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Refresh `store` every `every`, starting one period from now.
pub fn spawn_reconciliation<A: NotificationApi>(
    store: NotificationStore<A>,
    every: Duration,
) -> ReconcileHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the initial load happens elsewhere
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped(&mut shutdown_rx) => break,
            }

            match store.refresh().await {
                Ok(RefreshOutcome::Applied) => {
                    debug!(
                        component = "poller",
                        event = "poller.refreshed",
                        user_id = store.user_id(),
                    );
                }
                Ok(RefreshOutcome::Superseded) => {}
                Err(StoreError::Snapshot(TransportError::AuthExpired)) => {
                    info!(
                        component = "poller",
                        event = "poller.stopped.auth_expired",
                        user_id = store.user_id(),
                        "Session expired, stopping reconciliation"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        component = "poller",
                        event = "poller.refresh_failed",
                        user_id = store.user_id(),
                        error = %e,
                        "Periodic notification refresh failed"
                    );
                }
            }
        }
    });

    ReconcileHandle {
        shutdown_tx,
        handle: Some(handle),
    }
}
