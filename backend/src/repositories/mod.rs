//! Data access layer
//!
//! Each concern is a trait with a PostgreSQL implementation and an
//! in-memory one. The backend is picked once at startup and handed to the
//! services as a [`Storage`] bundle.

use async_trait::async_trait;
use fitcoach_shared::{DeviceStats, Goal, LiveSession, Profile, Schedule, TelemetrySample};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod directory;
pub mod memory;
pub mod schedules;
pub mod sessions;
pub mod telemetry;

pub use directory::PgUserDirectory;
pub use memory::MemoryStore;
pub use schedules::PgScheduleStore;
pub use sessions::PgSessionStore;
pub use telemetry::PgTelemetryStore;

/// Errors raised by any store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record was modified concurrently")]
    VersionConflict,

    #[error("User already has an active session {existing}")]
    ActiveSessionExists { existing: Uuid },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted training schedules
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Store a new schedule and deactivate the user's other active schedules
    async fn insert(&self, schedule: &Schedule) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Schedule>>;

    async fn active_for_user(&self, user_id: Uuid) -> StoreResult<Option<Schedule>>;

    async fn active_ids(&self) -> StoreResult<Vec<Uuid>>;

    /// Compare-and-swap on `schedule.version`; returns the new version
    async fn save(&self, schedule: &Schedule) -> StoreResult<i64>;
}

/// Live sessions, their finalized history and per-device totals
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with [`StoreError::ActiveSessionExists`] when the user already has one
    async fn create(&self, session: &LiveSession) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<LiveSession>>;

    async fn active_for_user(&self, user_id: Uuid) -> StoreResult<Option<LiveSession>>;

    async fn active_for_device(&self, device_id: &str) -> StoreResult<Option<LiveSession>>;

    /// Persist running aggregates of an active session. Returns `false`
    /// when the stored session is no longer active and nothing was written.
    async fn checkpoint(&self, session: &LiveSession) -> StoreResult<bool>;

    /// Mark the session completed, append its history record and fold it
    /// into the device totals. Returns `false` if it was already completed.
    async fn finalize(&self, session: &LiveSession) -> StoreResult<bool>;

    async fn history_count(&self, session_id: Uuid) -> StoreResult<u64>;

    async fn device_stats(&self, device_id: &str) -> StoreResult<Option<DeviceStats>>;
}

/// Durable sink for raw telemetry samples
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn write_batch(&self, samples: &[TelemetrySample]) -> StoreResult<()>;
}

/// Read-only view of profile and goal records owned by the profile service
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;

    async fn goal(&self, user_id: Uuid, goal_id: Uuid) -> StoreResult<Option<Goal>>;

    async fn active_goal(&self, user_id: Uuid) -> StoreResult<Option<Goal>>;
}

/// The store implementations the services run against
#[derive(Clone)]
pub struct Storage {
    pub schedules: Arc<dyn ScheduleStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub directory: Arc<dyn UserDirectory>,
}

impl Storage {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            schedules: Arc::new(PgScheduleStore::new(pool.clone())),
            sessions: Arc::new(PgSessionStore::new(pool.clone())),
            telemetry: Arc::new(PgTelemetryStore::new(pool.clone())),
            directory: Arc::new(PgUserDirectory::new(pool)),
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            schedules: store.clone(),
            sessions: store.clone(),
            telemetry: store.clone(),
            directory: store,
        }
    }
}
