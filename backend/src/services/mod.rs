//! Business logic services
//!
//! Services are built once at startup by [`Services::init`] and shared by
//! the HTTP handlers, the live WebSocket handler and the background ticker.

pub mod broadcast;
pub mod jobs;
pub mod plans;
pub mod sessions;
pub mod telemetry;

pub use broadcast::{Backplane, Broadcaster, LocalBackplane, RedisBackplane, SubscriptionKey};
pub use jobs::{Ticker, TickerConfig};
pub use plans::PlanService;
pub use sessions::SessionTracker;
pub use telemetry::TelemetryIngest;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::repositories::Storage;
use fitcoach_shared::ScheduleAdjuster;
use std::sync::Arc;

#[derive(Clone)]
pub struct Services {
    pub plans: Arc<PlanService>,
    pub sessions: Arc<SessionTracker>,
    pub telemetry: Arc<TelemetryIngest>,
    pub broadcaster: Arc<Broadcaster>,
}

impl Services {
    pub fn init(
        storage: Storage,
        clock: Arc<dyn Clock>,
        backplane: Arc<dyn Backplane>,
        config: &AppConfig,
    ) -> Self {
        let scheduling = &config.scheduling;

        let plans = Arc::new(PlanService::new(
            storage.schedules.clone(),
            storage.directory.clone(),
            clock.clone(),
            scheduling.planner(),
            ScheduleAdjuster::new(scheduling.adjuster()),
            scheduling.default_intensity,
        ));
        let sessions = Arc::new(SessionTracker::new(
            storage.sessions.clone(),
            storage.directory.clone(),
            plans.clone(),
            clock.clone(),
            scheduling.default_intensity,
            config.telemetry.checkpoint_every,
        ));
        let broadcaster = Arc::new(Broadcaster::new(backplane, config.live.channel_capacity));
        let telemetry = Arc::new(TelemetryIngest::new(
            storage.telemetry.clone(),
            sessions.clone(),
            broadcaster.clone(),
            clock,
            config.telemetry.buffer_max_samples,
            config.telemetry.max_queued_samples,
        ));

        Self {
            plans,
            sessions,
            telemetry,
            broadcaster,
        }
    }
}
