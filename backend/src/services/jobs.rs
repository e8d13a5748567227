//! Periodic background work
//!
//! One task drives schedule reconciliation, telemetry flushing and live
//! connection pruning on independent intervals. Shutdown stops the task and
//! performs a final telemetry flush.

use crate::config::AppConfig;
use crate::services::Services;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct TickerConfig {
    pub reconcile_every: Duration,
    pub flush_every: Duration,
    pub prune_every: Duration,
}

impl From<&AppConfig> for TickerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            reconcile_every: config.scheduling.reconcile_interval(),
            flush_every: config.telemetry.flush_interval(),
            prune_every: config.live.prune_interval(),
        }
    }
}

pub struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    /// Spawn the background task. Reconciliation runs once right away.
    pub fn start(services: Services, config: TickerConfig) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut reconcile = interval(config.reconcile_every);
            let mut flush = interval_at(Instant::now() + config.flush_every, config.flush_every);
            let mut prune = interval_at(Instant::now() + config.prune_every, config.prune_every);
            for timer in [&mut reconcile, &mut flush, &mut prune] {
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            }

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = reconcile.tick() => {
                        let changed = services.plans.reconcile_all().await;
                        if changed > 0 {
                            info!(changed, "Reconciled schedules");
                        }
                    }
                    _ = flush.tick() => {
                        let written = services.telemetry.flush_all().await;
                        if written > 0 {
                            debug!(written, "Flushed telemetry");
                        }
                    }
                    _ = prune.tick() => {
                        services.broadcaster.prune();
                    }
                }
            }

            let written = services.telemetry.flush_all().await;
            let pending = services.telemetry.pending();
            if pending > 0 {
                warn!(pending, "Telemetry samples left unwritten at shutdown");
            }
            info!(written, "Background jobs stopped");
        });

        Self { shutdown, handle }
    }

    /// Receiver that flips to `true` when the ticker shuts down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            debug!("Background task already stopped");
        }
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
}
