//! Live session lifecycle
//!
//! Active sessions are cached per id behind an async mutex so samples for
//! one session are applied in arrival order. A cache miss loads the session
//! from the store, which lets any instance continue a session. A checkpoint
//! that finds the stored session already ended evicts the cached copy, and
//! the sample goes to whatever session the device has open now.
//!
//! Live progress is credited to the linked schedule day once at least a
//! minute of new exercise has accumulated, and always when the session ends.

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::repositories::{SessionStore, StoreResult, UserDirectory};
use crate::services::plans::PlanService;
use dashmap::DashMap;
use fitcoach_shared::validation::validate_device_id;
use fitcoach_shared::{
    calories_per_hour, EndSessionRequest, Intensity, LiveSession, LiveSessionStatus,
    SessionAggregates, SessionStatus, StartSessionRequest, StartSessionResponse, TelemetrySample,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Smallest growth in session hours that triggers a schedule credit
const CREDIT_STEP_HOURS: f64 = 1.0 / 60.0;

struct LiveState {
    session: LiveSession,
    credited_hours: f64,
}

#[derive(Clone)]
struct CachedSession {
    device_id: String,
    state: Arc<Mutex<LiveState>>,
}

enum Folded {
    Applied { snapshot: LiveSession, credit: bool },
    Inactive,
    Stale,
}

pub struct SessionTracker {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn UserDirectory>,
    plans: Arc<PlanService>,
    clock: Arc<dyn Clock>,
    default_intensity: Intensity,
    checkpoint_every: u64,
    active: DashMap<Uuid, CachedSession>,
}

impl SessionTracker {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn UserDirectory>,
        plans: Arc<PlanService>,
        clock: Arc<dyn Clock>,
        default_intensity: Intensity,
        checkpoint_every: u64,
    ) -> Self {
        Self {
            sessions,
            directory,
            plans,
            clock,
            default_intensity,
            checkpoint_every: checkpoint_every.max(1),
            active: DashMap::new(),
        }
    }

    /// Open a session for the user, linking today's scheduled day when there is one
    pub async fn start(&self, user_id: Uuid, request: StartSessionRequest) -> ApiResult<StartSessionResponse> {
        request.validate()?;
        validate_device_id(&request.device_id).map_err(ApiError::Validation)?;
        let device_id = request.device_id.trim().to_string();

        if let Some(existing) = self.sessions.active_for_user(user_id).await? {
            return Err(ApiError::ActiveSession(existing.id));
        }

        let schedule = self.plans.find_active(user_id).await?;
        let today = self.clock.today();
        let linked_date = schedule
            .as_ref()
            .and_then(|s| s.day_on(today))
            .filter(|d| matches!(d.status, SessionStatus::Pending | SessionStatus::Completed))
            .map(|d| d.date);

        let goal_id = match &schedule {
            Some(s) => Some(s.goal_id),
            None => self.directory.active_goal(user_id).await?.map(|g| g.id),
        };
        let intensity = schedule.as_ref().map(|s| s.intensity).unwrap_or(self.default_intensity);
        let calorie_rate_per_hour = self
            .directory
            .profile(user_id)
            .await?
            .map(|p| calories_per_hour(intensity, p.weight_kg));

        let session = LiveSession {
            id: Uuid::new_v4(),
            user_id,
            device_id,
            plan_id: schedule.as_ref().map(|s| s.id),
            goal_id,
            linked_date,
            status: LiveSessionStatus::Active,
            started_at: self.clock.now(),
            ended_at: None,
            aggregates: SessionAggregates::default(),
            calorie_rate_per_hour,
        };
        self.sessions.create(&session).await?;
        self.cache(session.clone());

        info!(
            session_id = %session.id,
            user_id = %user_id,
            device_id = %session.device_id,
            linked_date = ?linked_date,
            "Live session started"
        );

        Ok(StartSessionResponse {
            session_id: session.id,
            plan_id: session.plan_id,
            goal_id: session.goal_id,
            linked_date,
        })
    }

    /// Fold a sample into the device's active session, if any.
    ///
    /// Returns the updated session. Storage failures are logged and treated
    /// as "no session" so ingest never fails on them.
    pub async fn apply_sample(&self, sample: &TelemetrySample) -> Option<LiveSession> {
        // One retry after evicting a session that was ended elsewhere
        for _ in 0..2 {
            let cached = match self.resolve(sample).await {
                Ok(Some(cached)) => cached,
                Ok(None) => return None,
                Err(e) => {
                    warn!(device_id = %sample.device_id, error = %e, "Failed to resolve live session");
                    return None;
                }
            };

            match self.fold(&cached, sample).await {
                Folded::Applied { snapshot, credit } => {
                    if credit {
                        self.credit_schedule(&snapshot).await;
                    }
                    return Some(snapshot);
                }
                Folded::Inactive => return None,
                Folded::Stale => continue,
            }
        }
        None
    }

    async fn fold(&self, cached: &CachedSession, sample: &TelemetrySample) -> Folded {
        let mut state = cached.state.lock().await;
        if !state.session.is_active() {
            return Folded::Inactive;
        }

        let mut next = state.session.clone();
        let rate = next.calorie_rate_per_hour;
        next.aggregates.apply(sample, rate);

        if next.aggregates.sample_count % self.checkpoint_every == 0 {
            match self.sessions.checkpoint(&next).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(session_id = %next.id, device_id = %next.device_id, "Cached session ended elsewhere, evicting");
                    state.session.status = LiveSessionStatus::Completed;
                    self.active.remove(&next.id);
                    return Folded::Stale;
                }
                Err(e) => warn!(session_id = %next.id, error = %e, "Session checkpoint failed"),
            }
        }

        let hours = next.completed_hours();
        let credit = next.linked_date.is_some() && hours - state.credited_hours >= CREDIT_STEP_HOURS;
        if credit {
            state.credited_hours = hours;
        }
        state.session = next.clone();
        Folded::Applied { snapshot: next, credit }
    }

    /// Finalize a session. Ending an already finished session returns the stored record.
    pub async fn end(&self, user_id: Uuid, session_id: Uuid, request: EndSessionRequest) -> ApiResult<LiveSession> {
        let Some(cached) = self.handle(session_id).await? else {
            let stored = self.load_owned(user_id, session_id).await?;
            return Ok(stored);
        };

        let mut guard = cached.state.lock().await;
        if guard.session.user_id != user_id {
            return Err(ApiError::NotFound("Session not found".to_string()));
        }
        if !guard.session.is_active() {
            return Ok(guard.session.clone());
        }

        let mut session = guard.session.clone();
        if let Some(metrics) = &request.final_metrics {
            let rate = session.calorie_rate_per_hour;
            session.aggregates.apply_metrics(metrics, request.battery, rate);
        }
        session.status = LiveSessionStatus::Completed;
        session.ended_at = Some(self.clock.now());

        let finalized = self.sessions.finalize(&session).await?;
        self.active.remove(&session_id);

        if !finalized {
            // Another instance finished it first
            debug!(session_id = %session_id, "Session already finalized elsewhere");
            let stored = self.load_owned(user_id, session_id).await?;
            guard.session = stored.clone();
            return Ok(stored);
        }

        guard.session = session.clone();
        guard.credited_hours = session.completed_hours();
        drop(guard);
        self.credit_schedule(&session).await;

        info!(
            session_id = %session.id,
            duration_secs = session.aggregates.duration,
            distance = session.aggregates.total_distance,
            calories = session.aggregates.total_calories,
            samples = session.aggregates.sample_count,
            "Live session ended"
        );
        Ok(session)
    }

    /// Current state of a session owned by the caller
    pub async fn get(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<LiveSession> {
        let cached = self.active.get(&session_id).map(|c| c.state.clone());
        if let Some(state) = cached {
            let session = state.lock().await.session.clone();
            if session.user_id == user_id {
                return Ok(session);
            }
            return Err(ApiError::NotFound("Session not found".to_string()));
        }
        self.load_owned(user_id, session_id).await
    }

    pub fn cached_sessions(&self) -> usize {
        self.active.len()
    }

    async fn load_owned(&self, user_id: Uuid, session_id: Uuid) -> ApiResult<LiveSession> {
        match self.sessions.get(session_id).await? {
            Some(session) if session.user_id == user_id => Ok(session),
            _ => Err(ApiError::NotFound("Session not found".to_string())),
        }
    }

    async fn credit_schedule(&self, session: &LiveSession) {
        let (Some(plan_id), Some(date)) = (session.plan_id, session.linked_date) else {
            return;
        };
        let calories = session.aggregates.estimated_calories(session.calorie_rate_per_hour);
        if let Err(e) = self
            .plans
            .record_live_progress(plan_id, date, session.id, session.completed_hours(), calories)
            .await
        {
            warn!(session_id = %session.id, plan_id = %plan_id, error = %e, "Failed to credit live progress");
        }
    }

    /// Session a sample belongs to: the one it names, else the device's active session
    async fn resolve(&self, sample: &TelemetrySample) -> StoreResult<Option<CachedSession>> {
        if let Some(id) = sample.session_id {
            if let Some(cached) = self.handle(id).await? {
                if cached.device_id == sample.device_id {
                    return Ok(Some(cached));
                }
            }
        }

        let local = self
            .active
            .iter()
            .find(|entry| entry.value().device_id == sample.device_id)
            .map(|entry| entry.value().clone());
        if local.is_some() {
            return Ok(local);
        }

        Ok(self
            .sessions
            .active_for_device(&sample.device_id)
            .await?
            .map(|session| self.cache(session)))
    }

    /// Cached handle for an active session, loading it from the store on a miss
    async fn handle(&self, session_id: Uuid) -> StoreResult<Option<CachedSession>> {
        if let Some(cached) = self.active.get(&session_id) {
            return Ok(Some(cached.clone()));
        }
        Ok(self
            .sessions
            .get(session_id)
            .await?
            .filter(LiveSession::is_active)
            .map(|session| self.cache(session)))
    }

    fn cache(&self, session: LiveSession) -> CachedSession {
        self.active
            .entry(session.id)
            .or_insert_with(|| CachedSession {
                device_id: session.device_id.clone(),
                state: Arc::new(Mutex::new(LiveState {
                    credited_hours: session.completed_hours(),
                    session,
                })),
            })
            .clone()
    }
}
