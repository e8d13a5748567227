//! In-memory store
//!
//! Implements every repository trait over process-local maps. Used for
//! development without a database and by the integration tests.

use super::{
    ScheduleStore, SessionStore, StoreError, StoreResult, TelemetryStore, UserDirectory,
};
use async_trait::async_trait;
use fitcoach_shared::{
    DeviceStats, Goal, LiveSession, LiveSessionStatus, Profile, Schedule, TelemetrySample,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    schedules: HashMap<Uuid, Schedule>,
    sessions: HashMap<Uuid, LiveSession>,
    history: HashMap<Uuid, LiveSession>,
    device_stats: HashMap<String, DeviceStats>,
    samples: Vec<TelemetrySample>,
    batch_sizes: Vec<usize>,
    profiles: HashMap<Uuid, Profile>,
    goals: Vec<Goal>,
}

/// Process-local implementation of all stores
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_telemetry_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_profile(&self, user_id: Uuid, profile: Profile) {
        self.state.write().await.profiles.insert(user_id, profile);
    }

    /// Add a goal; the most recently added goal is the user's active one
    pub async fn put_goal(&self, goal: Goal) {
        let mut state = self.state.write().await;
        state.goals.retain(|g| g.id != goal.id);
        state.goals.push(goal);
    }

    /// Sizes of every successfully written telemetry batch, in order
    pub async fn telemetry_batches(&self) -> Vec<usize> {
        self.state.read().await.batch_sizes.clone()
    }

    pub async fn stored_samples(&self) -> usize {
        self.state.read().await.samples.len()
    }

    /// Make telemetry writes fail until switched back
    pub fn set_fail_telemetry_writes(&self, fail: bool) {
        self.fail_telemetry_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn insert(&self, schedule: &Schedule) -> StoreResult<()> {
        let mut state = self.state.write().await;
        for existing in state.schedules.values_mut() {
            if existing.user_id == schedule.user_id && existing.is_active {
                existing.is_active = false;
                existing.version += 1;
            }
        }
        state.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        Ok(self.state.read().await.schedules.get(&id).cloned())
    }

    async fn active_for_user(&self, user_id: Uuid) -> StoreResult<Option<Schedule>> {
        let state = self.state.read().await;
        Ok(state
            .schedules
            .values()
            .filter(|s| s.user_id == user_id && s.is_active)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn active_ids(&self) -> StoreResult<Vec<Uuid>> {
        let state = self.state.read().await;
        let mut active: Vec<&Schedule> = state.schedules.values().filter(|s| s.is_active).collect();
        active.sort_by_key(|s| s.created_at);
        Ok(active.into_iter().map(|s| s.id).collect())
    }

    async fn save(&self, schedule: &Schedule) -> StoreResult<i64> {
        let mut state = self.state.write().await;
        let stored = state
            .schedules
            .get_mut(&schedule.id)
            .ok_or(StoreError::NotFound("Schedule"))?;
        if stored.version != schedule.version {
            return Err(StoreError::VersionConflict);
        }
        *stored = schedule.clone();
        stored.version += 1;
        Ok(stored.version)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create(&self, session: &LiveSession) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .sessions
            .values()
            .find(|s| s.user_id == session.user_id && s.is_active())
        {
            return Err(StoreError::ActiveSessionExists {
                existing: existing.id,
            });
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<LiveSession>> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn active_for_user(&self, user_id: Uuid) -> StoreResult<Option<LiveSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.is_active())
            .cloned())
    }

    async fn active_for_device(&self, device_id: &str) -> StoreResult<Option<LiveSession>> {
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.device_id == device_id && s.is_active())
            .max_by_key(|s| s.started_at)
            .cloned())
    }

    async fn checkpoint(&self, session: &LiveSession) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(&session.id) {
            Some(stored) if stored.is_active() => {
                *stored = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize(&self, session: &LiveSession) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let stored = state
            .sessions
            .get_mut(&session.id)
            .ok_or(StoreError::NotFound("Session"))?;
        if !stored.is_active() {
            return Ok(false);
        }

        let mut finished = session.clone();
        finished.status = LiveSessionStatus::Completed;
        *stored = finished.clone();

        state
            .device_stats
            .entry(finished.device_id.clone())
            .or_insert_with(|| DeviceStats {
                device_id: finished.device_id.clone(),
                ..DeviceStats::default()
            })
            .record(&finished);
        state.history.entry(finished.id).or_insert(finished);
        Ok(true)
    }

    async fn history_count(&self, session_id: Uuid) -> StoreResult<u64> {
        Ok(u64::from(self.state.read().await.history.contains_key(&session_id)))
    }

    async fn device_stats(&self, device_id: &str) -> StoreResult<Option<DeviceStats>> {
        Ok(self.state.read().await.device_stats.get(device_id).cloned())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn write_batch(&self, samples: &[TelemetrySample]) -> StoreResult<()> {
        if self.fail_telemetry_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        let mut state = self.state.write().await;
        state.samples.extend_from_slice(samples);
        state.batch_sizes.push(samples.len());
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.state.read().await.profiles.get(&user_id).cloned())
    }

    async fn goal(&self, user_id: Uuid, goal_id: Uuid) -> StoreResult<Option<Goal>> {
        let state = self.state.read().await;
        Ok(state
            .goals
            .iter()
            .find(|g| g.id == goal_id && g.user_id == user_id)
            .cloned())
    }

    async fn active_goal(&self, user_id: Uuid) -> StoreResult<Option<Goal>> {
        let state = self.state.read().await;
        Ok(state.goals.iter().rev().find(|g| g.user_id == user_id).cloned())
    }
}
