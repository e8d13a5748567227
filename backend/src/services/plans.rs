//! Plan service: schedule creation, reconciliation and user adjustments
//!
//! Every mutation of a schedule goes through [`PlanService::mutate`], which
//! serializes writers on the same schedule inside this process and retries
//! the store's optimistic version check a bounded number of times to cover
//! writers in other processes.

use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::repositories::{ScheduleStore, StoreError, UserDirectory};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use fitcoach_shared::types::days_until;
use fitcoach_shared::{
    generate_plan, AdjustmentResponse, CreatePlanRequest, DayProgress, Intensity, PlanPreview,
    PlanPreviewRequest, PlanRequest, PlannerConfig, ReconcileReport, RescheduleRequest,
    RedistributeRequest, Schedule, ScheduleAdjuster, ScheduleError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Attempts at a compare-and-swap save before reporting a conflict
const SAVE_ATTEMPTS: usize = 3;

/// Schedule after a reconciliation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub report: ReconcileReport,
    pub schedule: Schedule,
}

/// One async mutex per schedule id. An entry lives only while someone
/// holds or waits on it.
#[derive(Default)]
struct ScheduleLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ScheduleLocks {
    async fn acquire(&self, id: Uuid) -> ScheduleGuard<'_> {
        let lock = self.locks.entry(id).or_default().clone();
        ScheduleGuard {
            locks: self,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

struct ScheduleGuard<'a> {
    locks: &'a ScheduleLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ScheduleGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left means no holder and no waiter
        self.locks
            .locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct PlanService {
    schedules: Arc<dyn ScheduleStore>,
    directory: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    planner: PlannerConfig,
    adjuster: ScheduleAdjuster,
    default_intensity: Intensity,
    locks: ScheduleLocks,
}

impl PlanService {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        directory: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        planner: PlannerConfig,
        adjuster: ScheduleAdjuster,
        default_intensity: Intensity,
    ) -> Self {
        Self {
            schedules,
            directory,
            clock,
            planner,
            adjuster,
            default_intensity,
            locks: ScheduleLocks::default(),
        }
    }

    /// Compute a plan without persisting anything
    pub fn preview(&self, request: &PlanPreviewRequest) -> ApiResult<PlanPreview> {
        request.validate()?;
        let plan_request = request.to_plan_request(self.clock.today(), self.default_intensity)?;
        let plan = generate_plan(&plan_request, &self.planner)?;
        Ok(PlanPreview::from(&plan))
    }

    /// Generate and persist a schedule for one of the caller's goals
    pub async fn create(&self, user_id: Uuid, request: CreatePlanRequest) -> ApiResult<Schedule> {
        request.validate()?;

        let goal = self
            .directory
            .goal(user_id, request.goal_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Goal not found".to_string()))?;
        let profile = self
            .directory
            .profile(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Profile not found".to_string()))?;

        let start_date = request.start_date.unwrap_or_else(|| self.clock.today());
        let duration_days = match request.duration_days {
            Some(days) => days,
            None => days_until(start_date, goal.target_date).ok_or_else(|| {
                ApiError::Validation("Goal target date is before the plan start date".to_string())
            })?,
        };

        let plan = generate_plan(
            &PlanRequest {
                profile,
                current_weight_kg: goal.current_weight_kg,
                target_weight_kg: goal.target_weight_kg,
                goal_type: goal.goal_type,
                duration_days,
                start_date,
                intensity: request.intensity.unwrap_or(self.default_intensity),
            },
            &self.planner,
        )?;

        let schedule = plan.into_schedule(user_id, goal.id, self.clock.now());
        self.schedules.insert(&schedule).await?;

        info!(
            schedule_id = %schedule.id,
            user_id = %user_id,
            days = schedule.days.len(),
            daily_hours = schedule.daily_hours,
            "Schedule created"
        );
        Ok(schedule)
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> ApiResult<Schedule> {
        self.load_owned(Some(user_id), id).await
    }

    pub async fn active(&self, user_id: Uuid) -> ApiResult<Schedule> {
        self.schedules
            .active_for_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("No active schedule".to_string()))
    }

    /// Active schedule if the user has one; used when linking live sessions
    pub async fn find_active(&self, user_id: Uuid) -> ApiResult<Option<Schedule>> {
        Ok(self.schedules.active_for_user(user_id).await?)
    }

    pub async fn log_session(
        &self,
        user_id: Uuid,
        id: Uuid,
        index: usize,
        hours: f64,
    ) -> ApiResult<DayProgress> {
        let adjuster = self.adjuster;
        let (progress, _) = self
            .mutate(Some(user_id), id, |schedule, _, now| {
                adjuster.log_completion(schedule, index, hours, now)
            })
            .await?;
        Ok(progress)
    }

    pub async fn reschedule(
        &self,
        user_id: Uuid,
        id: Uuid,
        index: usize,
        request: RescheduleRequest,
    ) -> ApiResult<AdjustmentResponse> {
        request.validate()?;
        let adjuster = self.adjuster;
        let (allocation, schedule) = self
            .mutate(Some(user_id), id, |schedule, today, now| {
                adjuster.reschedule(schedule, index, request.new_date, request.reason.clone(), today, now)
            })
            .await?;

        info!(schedule_id = %id, index, new_date = %request.new_date, "Missed session rescheduled");
        Ok(AdjustmentResponse { allocation, schedule })
    }

    pub async fn redistribute(
        &self,
        user_id: Uuid,
        id: Uuid,
        index: usize,
        request: RedistributeRequest,
    ) -> ApiResult<AdjustmentResponse> {
        request.validate()?;
        let targets = request.targets().map_err(ApiError::Validation)?;
        let adjuster = self.adjuster;
        let (allocation, schedule) = self
            .mutate(Some(user_id), id, |schedule, today, now| {
                adjuster.redistribute(schedule, index, &targets, request.reason.clone(), today, now)
            })
            .await?;

        info!(schedule_id = %id, index, placed = allocation.placed(), "Missed session redistributed");
        Ok(AdjustmentResponse { allocation, schedule })
    }

    pub async fn emergency_catch_up(&self, user_id: Uuid, id: Uuid) -> ApiResult<AdjustmentResponse> {
        let adjuster = self.adjuster;
        let (allocation, schedule) = self
            .mutate(Some(user_id), id, |schedule, today, now| {
                adjuster.emergency_catch_up(schedule, today, now)
            })
            .await?;

        info!(
            schedule_id = %id,
            placed = allocation.placed(),
            unplaced = allocation.unplaced,
            "Emergency catch-up applied"
        );
        Ok(AdjustmentResponse { allocation, schedule })
    }

    /// Reconcile one schedule; `user_id` restricts it to the owner
    pub async fn reconcile(&self, user_id: Option<Uuid>, id: Uuid) -> ApiResult<ReconcileOutcome> {
        let adjuster = self.adjuster;
        let (report, schedule) = self
            .mutate(user_id, id, |schedule, today, now| {
                Ok(adjuster.reconcile(schedule, today, now))
            })
            .await?;

        if report.changed() {
            metrics::counter!("schedule_sessions_missed_total").increment(report.newly_missed.len() as u64);
            info!(
                schedule_id = %id,
                newly_missed = report.newly_missed.len(),
                redistributed = report.hours_redistributed,
                unplaced = report.hours_unplaced,
                emergency = report.emergency_triggered,
                "Schedule reconciled"
            );
        }
        Ok(ReconcileOutcome { report, schedule })
    }

    /// Reconcile every active schedule. Failures are logged per schedule.
    pub async fn reconcile_all(&self) -> usize {
        let ids = match self.schedules.active_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list active schedules");
                return 0;
            }
        };

        let mut changed = 0;
        for id in ids {
            match self.reconcile(None, id).await {
                Ok(outcome) if outcome.report.changed() => changed += 1,
                Ok(_) => {}
                Err(e) => warn!(schedule_id = %id, error = %e, "Reconciliation failed"),
            }
        }
        debug!(changed, "Reconciliation pass finished");
        changed
    }

    /// Credit a live session's running totals to a schedule day
    pub async fn record_live_progress(
        &self,
        schedule_id: Uuid,
        date: NaiveDate,
        session_id: Uuid,
        hours: f64,
        calories: f64,
    ) -> ApiResult<DayProgress> {
        let adjuster = self.adjuster;
        let (progress, _) = self
            .mutate(None, schedule_id, |schedule, _, now| {
                adjuster.record_live_progress(schedule, date, session_id, hours, calories, now)
            })
            .await?;

        if progress.completed_now {
            info!(schedule_id = %schedule_id, index = progress.index, "Day completed from live session");
        }
        Ok(progress)
    }

    async fn load_owned(&self, user_id: Option<Uuid>, id: Uuid) -> ApiResult<Schedule> {
        let schedule = self
            .schedules
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Schedule not found".to_string()))?;

        match user_id {
            Some(user) if schedule.user_id != user => {
                Err(ApiError::NotFound("Schedule not found".to_string()))
            }
            _ => Ok(schedule),
        }
    }

    /// Apply `change` to the stored schedule and save it, retrying on
    /// version conflicts. Unchanged schedules are not written.
    async fn mutate<T, F>(&self, user_id: Option<Uuid>, id: Uuid, mut change: F) -> ApiResult<(T, Schedule)>
    where
        F: FnMut(&mut Schedule, NaiveDate, DateTime<Utc>) -> Result<T, ScheduleError> + Send,
        T: Send,
    {
        let _guard = self.locks.acquire(id).await;

        for attempt in 1..=SAVE_ATTEMPTS {
            let original = self.load_owned(user_id, id).await?;
            let mut schedule = original.clone();
            let output = change(&mut schedule, self.clock.today(), self.clock.now())?;

            if schedule == original {
                return Ok((output, schedule));
            }

            match self.schedules.save(&schedule).await {
                Ok(version) => {
                    schedule.version = version;
                    return Ok((output, schedule));
                }
                Err(StoreError::VersionConflict) => {
                    debug!(schedule_id = %id, attempt, "Schedule version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(schedule_id = %id, "Schedule save kept conflicting");
        Err(StoreError::VersionConflict.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repositories::MemoryStore;
    use chrono::Duration;
    use fitcoach_shared::{
        ActivityLevel, AdjusterConfig, BiologicalSex, Goal, GoalType, Profile, SessionStatus,
    };

    struct Fixture {
        service: PlanService,
        clock: Arc<ManualClock>,
        user: Uuid,
        goal: Uuid,
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_date(date(5, 1)));
        let user = Uuid::new_v4();
        let goal = Uuid::new_v4();

        store
            .put_profile(
                user,
                Profile {
                    weight_kg: 70.0,
                    height_cm: 175.0,
                    birth_date: NaiveDate::from_ymd_opt(1994, 1, 1).unwrap(),
                    sex: BiologicalSex::Male,
                    activity_level: ActivityLevel::Moderate,
                },
            )
            .await;
        store
            .put_goal(Goal {
                id: goal,
                user_id: user,
                current_weight_kg: 71.0,
                target_weight_kg: 70.0,
                goal_type: GoalType::Lose,
                target_date: date(8, 8),
            })
            .await;

        let service = PlanService::new(
            store.clone(),
            store,
            clock.clone(),
            PlannerConfig::default(),
            ScheduleAdjuster::new(AdjusterConfig::default()),
            Intensity::Moderate,
        );
        Fixture {
            service,
            clock,
            user,
            goal,
        }
    }

    fn create_request(goal: Uuid, days: Option<i64>) -> CreatePlanRequest {
        CreatePlanRequest {
            goal_id: goal,
            duration_days: days,
            intensity: None,
            start_date: None,
        }
    }

    #[tokio::test]
    async fn test_create_defaults_duration_to_goal_date() {
        let f = fixture().await;
        let schedule = f.service.create(f.user, create_request(f.goal, None)).await.unwrap();

        // May 1 through Aug 8 inclusive
        assert_eq!(schedule.days.len(), 100);
        assert_eq!(schedule.days[0].date, date(5, 1));
        assert!((schedule.daily_hours - 77.0 / 560.0).abs() < 1e-9);

        let active = f.service.active(f.user).await.unwrap();
        assert_eq!(active.id, schedule.id);
    }

    #[tokio::test]
    async fn test_other_users_cannot_read_schedule() {
        let f = fixture().await;
        let schedule = f.service.create(f.user, create_request(f.goal, Some(30))).await.unwrap();

        let err = f.service.get(Uuid::new_v4(), schedule.id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent_and_bumps_version_once() {
        let f = fixture().await;
        let schedule = f.service.create(f.user, create_request(f.goal, Some(10))).await.unwrap();

        f.clock.advance(Duration::days(3));
        let first = f.service.reconcile(None, schedule.id).await.unwrap();
        assert_eq!(first.report.newly_missed, vec![0, 1, 2]);
        assert_eq!(first.schedule.version, 1);

        let second = f.service.reconcile(None, schedule.id).await.unwrap();
        assert!(!second.report.changed());
        assert_eq!(second.schedule.version, 1);
        assert_eq!(second.schedule.missed_count, 3);
    }

    #[tokio::test]
    async fn test_reconcile_all_visits_active_schedules() {
        let f = fixture().await;
        f.service.create(f.user, create_request(f.goal, Some(10))).await.unwrap();

        f.clock.advance(Duration::days(1));
        assert_eq!(f.service.reconcile_all().await, 1);
        assert_eq!(f.service.reconcile_all().await, 0);
    }

    #[tokio::test]
    async fn test_log_session_completes_day() {
        let f = fixture().await;
        let schedule = f.service.create(f.user, create_request(f.goal, Some(10))).await.unwrap();

        let progress = f
            .service
            .log_session(f.user, schedule.id, 0, schedule.daily_hours)
            .await
            .unwrap();
        assert!(progress.completed_now);
        assert_eq!(progress.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_schedule_locks_are_released_after_use() {
        let f = fixture().await;
        let first = f.service.create(f.user, create_request(f.goal, Some(10))).await.unwrap();
        f.service.log_session(f.user, first.id, 0, 0.1).await.unwrap();
        f.service.log_session(f.user, first.id, 1, 0.1).await.unwrap();
        assert_eq!(f.service.locks.len(), 0);

        let locks = ScheduleLocks::default();
        let id = Uuid::new_v4();
        let held = locks.acquire(id).await;
        assert_eq!(locks.len(), 1);
        drop(held);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_logs_are_serialized() {
        let f = Arc::new(fixture().await);
        let schedule = f.service.create(f.user, create_request(f.goal, Some(10))).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let f = f.clone();
            let id = schedule.id;
            handles.push(tokio::spawn(async move {
                f.service.log_session(f.user, id, 1, 0.1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = f.service.get(f.user, schedule.id).await.unwrap();
        assert!((stored.days[1].logged_hours - 0.8).abs() < 1e-9);
        assert_eq!(stored.version, 8);
        assert_eq!(f.service.locks.len(), 0);
    }
}
