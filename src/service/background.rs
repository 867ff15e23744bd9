use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::LayerDataService;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Periodic resync of every remote layer on a background task.
pub struct BackgroundSync {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl BackgroundSync {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Start resyncing now and then every `interval`.
    pub fn start(&mut self, service: Arc<LayerDataService>, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("background sync already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(resync_loop(service, interval, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Background sync started, every {}s", interval.as_secs());
        Ok(())
    }

    /// Cancel the task and wait for it to finish. An in-flight sector write
    /// is abandoned between store calls, never half-applied.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("background sync task failed to join")
        } else {
            Ok(())
        }
    }
}

impl Default for BackgroundSync {
    fn default() -> Self {
        Self::new()
    }
}

async fn resync_loop(service: Arc<LayerDataService>, interval: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !resync_pass(&service, &cancel_token).await {
                    break;
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }

    log_info!("Background sync stopped");
}

/// One pass over the remote layers. `false` once cancelled.
async fn resync_pass(service: &LayerDataService, cancel_token: &CancellationToken) -> bool {
    for name in service.remote_layer_names() {
        tokio::select! {
            result = service.sync_layer(&name) => match result {
                Ok(report) if report.aborted => {
                    log_warn!("Resync of {name} cut short by the remote rate limit");
                }
                Ok(report) => {
                    log_info!("Resync of {name}: {} sectors refreshed", report.refreshed);
                }
                Err(err) => log_error!("Resync of {name} failed: {err:#}"),
            },
            _ = cancel_token.cancelled() => return false,
        }
    }
    true
}
