//! Periodic idle-connection reaper.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::registry::ManagerInner;

/// Handle to a running reaper task. Dropping it stops the task.
pub(crate) struct Reaper {
    cancel: DropGuard,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Sweep the registry every `interval` until stopped or the registry is dropped.
    ///
    /// The first sweep happens one interval after start.
    pub(crate) fn spawn(manager: Weak<ManagerInner>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(inner) = manager.upgrade() else {
                    break;
                };
                inner.handle().sweep_idle().await;
            }

            tracing::info!("idle reaper stopped");
        });

        Self {
            cancel: cancel.drop_guard(),
            task,
        }
    }

    /// Stop the task and wait for an in-progress sweep to finish.
    pub(crate) async fn stop(self) {
        drop(self.cancel);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "idle reaper task failed");
        }
    }
}
