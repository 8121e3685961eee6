use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::ReconcileEngine;

/// Spawns the single background reconciliation task.
pub struct ReconcileScheduler;

impl ReconcileScheduler {
    /// Start ticking every `interval`.
    ///
    /// Ticks cannot overlap: the loop awaits `run_tick` inline, and a timer
    /// firing during a slow tick is delayed rather than bursted. Shutdown is
    /// observed only between ticks, so an in-flight tick always finishes.
    pub fn spawn(engine: ReconcileEngine, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = engine.run_tick().await;
                        if report.polled_anything() {
                            info!(
                                polled = report.polled,
                                not_ready = report.not_ready,
                                skipped = report.skipped,
                                updates = report.updates,
                                credits = report.credits,
                                rate_limited = report.rate_limited,
                                "reconcile tick"
                            );
                        } else {
                            debug!("reconcile tick: nothing to do");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("reconcile scheduler stopping");
                        break;
                    }
                }
            }
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle for stopping the background task deterministically.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the task to stop and wait for it. An in-flight tick runs to
    /// completion before the task exits.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// `true` once the background task has exited (normally via [`shutdown`],
    /// but also if it panicked).
    ///
    /// [`shutdown`]: SchedulerHandle::shutdown
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
