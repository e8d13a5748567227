//! Missed-session reconciliation and redistribution
//!
//! Every operation here mutates a [`Schedule`] in memory and is safe to run
//! repeatedly over the same data. Persistence and locking are the caller's
//! concern.
//!
//! Hours are conserved: whatever a missed day required is either added to
//! another day's `adjusted_hours` or kept as a [`Remainder`] on the schedule.
//! No day is ever pushed above the configured daily ceiling; overflow moves to
//! the next eligible day or stays a remainder.

use crate::errors::ScheduleError;
use crate::models::{
    ActionKind, ActionRecord, DaySession, LiveContribution, Remainder, Schedule, SessionStatus,
    HOURS_EPSILON,
};
use crate::validation::validate_hours;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which pending days may absorb a missed day's hours automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedistributionWindow {
    /// Whether today's session is a valid target
    pub include_today: bool,
    /// Only days before `today + horizon_days` are targets; `None` means no limit
    pub horizon_days: Option<u32>,
}

impl Default for RedistributionWindow {
    fn default() -> Self {
        Self {
            include_today: true,
            horizon_days: None,
        }
    }
}

/// Tunables for the adjuster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdjusterConfig {
    pub max_daily_hours: f64,
    /// Missed-session count at which emergency catch-up is flagged
    pub emergency_threshold: u32,
    pub window: RedistributionWindow,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            max_daily_hours: 3.5,
            emergency_threshold: 5,
            window: RedistributionWindow::default(),
        }
    }
}

/// Hours added to one day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub index: usize,
    pub date: NaiveDate,
    pub hours: f64,
}

/// Result of moving hours onto other days
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub placements: Vec<Placement>,
    /// Hours no eligible day could take
    pub unplaced: f64,
}

impl Allocation {
    pub fn placed(&self) -> f64 {
        self.placements.iter().map(|p| p.hours).sum()
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub newly_missed: Vec<usize>,
    pub hours_redistributed: f64,
    pub hours_unplaced: f64,
    pub emergency_triggered: bool,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.newly_missed.is_empty()
    }
}

/// Target selection for a user-initiated redistribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RedistributeTargets {
    /// The next `n` pending sessions
    Count(usize),
    /// Exactly these dates, each a pending session
    Dates(Vec<NaiveDate>),
}

/// Result of a live-progress or manual-log update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayProgress {
    pub index: usize,
    pub completed_hours: f64,
    pub required_hours: f64,
    pub calories_burned: f64,
    pub status: SessionStatus,
    pub completed_now: bool,
}

impl DayProgress {
    fn of(day: &DaySession, completed_now: bool) -> Self {
        Self {
            index: day.index,
            completed_hours: day.completed_hours,
            required_hours: day.required_hours(),
            calories_burned: day.calories_burned,
            status: day.status,
            completed_now,
        }
    }
}

/// Reconciles schedules against what was actually completed
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleAdjuster {
    config: AdjusterConfig,
}

impl ScheduleAdjuster {
    pub fn new(config: AdjusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdjusterConfig {
        &self.config
    }

    /// Mark every pending day before `today` as missed and redistribute its hours.
    ///
    /// Counters move exactly once per transition, so a second run over the
    /// same data changes nothing.
    pub fn reconcile(
        &self,
        schedule: &mut Schedule,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if !schedule.is_active {
            return report;
        }

        let overdue: Vec<usize> = schedule
            .days
            .iter()
            .filter(|d| d.is_pending() && d.date < today)
            .map(|d| d.index)
            .collect();

        for index in overdue {
            let day = &mut schedule.days[index];
            let required = day.required_hours();
            let missed_date = day.date;
            day.status = SessionStatus::Missed;
            day.action_history.push(ActionRecord {
                action: ActionKind::Missed,
                original_date: missed_date,
                new_date: None,
                hours_redistributed: None,
                reason: None,
                timestamp: now,
            });

            schedule.missed_count += 1;
            schedule.total_missed_hours += required;
            schedule.engagement.record_skip();
            report.newly_missed.push(index);

            if schedule.missed_count >= self.config.emergency_threshold
                && !schedule.emergency_catch_up
            {
                schedule.emergency_catch_up = true;
                report.emergency_triggered = true;
            }

            let targets = self.window_targets(schedule, missed_date, today);
            let allocation = spread_evenly(schedule, &targets, required, self.config.max_daily_hours);
            note_received(schedule, &allocation, missed_date, now);

            let day = &mut schedule.days[index];
            day.action_history.push(ActionRecord {
                action: ActionKind::AutoRedistribute,
                original_date: missed_date,
                new_date: None,
                hours_redistributed: Some(allocation.placed()),
                reason: None,
                timestamp: now,
            });
            report.hours_redistributed += allocation.placed();

            if allocation.unplaced > HOURS_EPSILON {
                report.hours_unplaced += allocation.unplaced;
                schedule.unredistributed.push(Remainder {
                    source_index: index,
                    source_date: missed_date,
                    hours: allocation.unplaced,
                    recorded_at: now,
                });
            } else {
                schedule.days[index].status = SessionStatus::Redistributed;
            }
        }

        if report.changed() {
            schedule.updated_at = now;
        }
        report
    }

    /// Move a missed day's outstanding hours to a single chosen date.
    /// Hours beyond the ceiling cascade to the following pending days.
    pub fn reschedule(
        &self,
        schedule: &mut Schedule,
        index: usize,
        new_date: NaiveDate,
        reason: Option<String>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Allocation, ScheduleError> {
        let (source_date, outstanding) = self.missed_source(schedule, index, "rescheduled")?;

        if new_date < today || new_date <= source_date {
            return Err(ScheduleError::Validation(format!(
                "New date {} must be a future date after {}",
                new_date, source_date
            )));
        }
        let target = schedule
            .day_on(new_date)
            .ok_or(ScheduleError::DateNotFound(new_date))?;
        if !target.is_pending() {
            return Err(ScheduleError::Validation(format!(
                "Session on {} is {} and cannot take more hours",
                new_date, target.status
            )));
        }

        let targets: Vec<usize> = schedule
            .days
            .iter()
            .filter(|d| d.is_pending() && d.date >= new_date)
            .map(|d| d.index)
            .collect();
        let allocation = fill_in_order(schedule, &targets, outstanding, self.config.max_daily_hours);
        note_received(schedule, &allocation, source_date, now);

        let day = &mut schedule.days[index];
        day.is_rescheduled = true;
        day.action_history.push(ActionRecord {
            action: ActionKind::Reschedule,
            original_date: source_date,
            new_date: Some(new_date),
            hours_redistributed: Some(allocation.placed()),
            reason,
            timestamp: now,
        });
        settle_remainder(schedule, index, &allocation, SessionStatus::Rescheduled, now);
        schedule.engagement.record_action();
        schedule.updated_at = now;
        Ok(allocation)
    }

    /// Spread a missed day's outstanding hours over sessions the user picked
    pub fn redistribute(
        &self,
        schedule: &mut Schedule,
        index: usize,
        selection: &RedistributeTargets,
        reason: Option<String>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Allocation, ScheduleError> {
        let (source_date, outstanding) = self.missed_source(schedule, index, "redistributed")?;

        let targets: Vec<usize> = match selection {
            RedistributeTargets::Count(0) => {
                return Err(ScheduleError::Validation(
                    "At least one session must be selected".to_string(),
                ))
            }
            RedistributeTargets::Count(count) => schedule
                .days
                .iter()
                .filter(|d| {
                    d.is_pending() && d.date > source_date && self.not_before_window(d.date, today)
                })
                .take(*count)
                .map(|d| d.index)
                .collect(),
            RedistributeTargets::Dates(dates) => {
                if dates.is_empty() {
                    return Err(ScheduleError::Validation(
                        "At least one session must be selected".to_string(),
                    ));
                }
                let mut picked = Vec::with_capacity(dates.len());
                for date in dates {
                    let day = schedule.day_on(*date).ok_or(ScheduleError::DateNotFound(*date))?;
                    if !day.is_pending() || *date <= source_date || *date < today {
                        return Err(ScheduleError::Validation(format!(
                            "Session on {} is not an upcoming pending session",
                            date
                        )));
                    }
                    if !picked.contains(&day.index) {
                        picked.push(day.index);
                    }
                }
                picked.sort_unstable();
                picked
            }
        };

        if targets.is_empty() {
            return Err(ScheduleError::Validation(
                "No upcoming pending sessions to redistribute into".to_string(),
            ));
        }

        let allocation = spread_evenly(schedule, &targets, outstanding, self.config.max_daily_hours);
        note_received(schedule, &allocation, source_date, now);

        let day = &mut schedule.days[index];
        day.is_redistributed = true;
        day.action_history.push(ActionRecord {
            action: ActionKind::Redistribute,
            original_date: source_date,
            new_date: None,
            hours_redistributed: Some(allocation.placed()),
            reason,
            timestamp: now,
        });
        settle_remainder(schedule, index, &allocation, SessionStatus::Redistributed, now);
        schedule.engagement.record_action();
        schedule.updated_at = now;
        Ok(allocation)
    }

    /// Merge every outstanding missed session into the next pending session.
    ///
    /// Remainders are consumed oldest first. Hours beyond the ceiling cascade
    /// to later pending sessions; whatever still does not fit stays outstanding.
    pub fn emergency_catch_up(
        &self,
        schedule: &mut Schedule,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Allocation, ScheduleError> {
        if !schedule.is_active {
            return Err(ScheduleError::Inactive);
        }
        if schedule.unredistributed.is_empty() {
            return Err(ScheduleError::NothingToCatchUp);
        }

        let targets: Vec<usize> = schedule
            .days
            .iter()
            .filter(|d| d.is_pending() && d.date >= today)
            .map(|d| d.index)
            .collect();
        if targets.is_empty() {
            return Err(ScheduleError::Validation(
                "No pending sessions left to absorb missed hours".to_string(),
            ));
        }

        // The flag and streak stay as they are when nothing can move
        let room: f64 = targets
            .iter()
            .map(|&i| schedule.days[i].capacity(self.config.max_daily_hours))
            .sum();
        if room <= HOURS_EPSILON {
            return Err(ScheduleError::NoCapacity);
        }

        let total = schedule.total_unredistributed();
        let allocation = fill_in_order(schedule, &targets, total, self.config.max_daily_hours);
        let first_date = allocation.placements.first().map(|p| p.date);

        let mut budget = allocation.placed();
        let mut remainders = std::mem::take(&mut schedule.unredistributed);
        remainders.sort_by_key(|r| (r.source_date, r.source_index));

        for mut remainder in remainders {
            let consumed = remainder.hours.min(budget);
            budget -= consumed;
            remainder.hours -= consumed;

            if consumed > HOURS_EPSILON {
                let day = &mut schedule.days[remainder.source_index];
                day.action_history.push(ActionRecord {
                    action: ActionKind::CatchUp,
                    original_date: remainder.source_date,
                    new_date: first_date,
                    hours_redistributed: Some(consumed),
                    reason: None,
                    timestamp: now,
                });
            }

            if remainder.hours > HOURS_EPSILON {
                schedule.unredistributed.push(remainder);
            } else if schedule.remainder_for(remainder.source_index) <= HOURS_EPSILON {
                schedule.days[remainder.source_index].status = SessionStatus::Catchup;
            }
        }

        for placement in &allocation.placements {
            schedule.days[placement.index].action_history.push(ActionRecord {
                action: ActionKind::Received,
                original_date: placement.date,
                new_date: None,
                hours_redistributed: Some(placement.hours),
                reason: Some("emergency catch-up".to_string()),
                timestamp: now,
            });
        }

        schedule.emergency_catch_up = false;
        schedule.engagement.record_action();
        schedule.updated_at = now;
        Ok(allocation)
    }

    /// Record manually logged hours for a day
    pub fn log_completion(
        &self,
        schedule: &mut Schedule,
        index: usize,
        hours: f64,
        now: DateTime<Utc>,
    ) -> Result<DayProgress, ScheduleError> {
        validate_hours(hours, "Hours completed").map_err(ScheduleError::Validation)?;
        let day = schedule
            .days
            .get_mut(index)
            .ok_or(ScheduleError::DayNotFound(index))?;
        if !matches!(day.status, SessionStatus::Pending | SessionStatus::Completed) {
            return Err(ScheduleError::InvalidTransition {
                index,
                status: day.status.to_string(),
                action: "logged",
            });
        }

        day.logged_hours += hours;
        let completed_now = complete_if_met(day, now);
        let progress = DayProgress::of(day, completed_now);
        schedule.updated_at = now;
        Ok(progress)
    }

    /// Credit a live session's totals to the day on `date`.
    ///
    /// The contribution is replaced, not added, so replaying the same totals
    /// is harmless; it never decreases.
    pub fn record_live_progress(
        &self,
        schedule: &mut Schedule,
        date: NaiveDate,
        session_id: Uuid,
        hours: f64,
        calories: f64,
        now: DateTime<Utc>,
    ) -> Result<DayProgress, ScheduleError> {
        let day = schedule
            .days
            .iter_mut()
            .find(|d| d.date == date)
            .ok_or(ScheduleError::DateNotFound(date))?;

        match day.live_contributions.iter_mut().find(|c| c.session_id == session_id) {
            Some(existing) => {
                existing.hours = existing.hours.max(hours);
                existing.calories = existing.calories.max(calories);
            }
            None => day.live_contributions.push(LiveContribution {
                session_id,
                hours: hours.max(0.0),
                calories: calories.max(0.0),
            }),
        }

        let completed_now = complete_if_met(day, now);
        let progress = DayProgress::of(day, completed_now);
        schedule.updated_at = now;
        Ok(progress)
    }

    fn missed_source(
        &self,
        schedule: &Schedule,
        index: usize,
        action: &'static str,
    ) -> Result<(NaiveDate, f64), ScheduleError> {
        if !schedule.is_active {
            return Err(ScheduleError::Inactive);
        }
        let day = schedule.day(index).ok_or(ScheduleError::DayNotFound(index))?;
        if day.status != SessionStatus::Missed {
            return Err(ScheduleError::InvalidTransition {
                index,
                status: day.status.to_string(),
                action,
            });
        }
        Ok((day.date, schedule.remainder_for(index)))
    }

    fn not_before_window(&self, date: NaiveDate, today: NaiveDate) -> bool {
        if self.config.window.include_today {
            date >= today
        } else {
            date > today
        }
    }

    fn window_targets(&self, schedule: &Schedule, missed_date: NaiveDate, today: NaiveDate) -> Vec<usize> {
        let horizon_end = self
            .config
            .window
            .horizon_days
            .map(|days| today + Duration::days(i64::from(days)));

        schedule
            .days
            .iter()
            .filter(|d| {
                d.is_pending()
                    && d.date > missed_date
                    && self.not_before_window(d.date, today)
                    && horizon_end.map_or(true, |end| d.date < end)
            })
            .map(|d| d.index)
            .collect()
    }
}

fn complete_if_met(day: &mut DaySession, now: DateTime<Utc>) -> bool {
    day.recompute_progress();
    if day.is_pending() && day.meets_requirement() {
        day.status = SessionStatus::Completed;
        day.action_history.push(ActionRecord {
            action: ActionKind::Completed,
            original_date: day.date,
            new_date: None,
            hours_redistributed: None,
            reason: None,
            timestamp: now,
        });
        return true;
    }
    false
}

/// Split `hours` evenly across `targets`, capping each at the ceiling and
/// re-spreading the overflow over days that still have room.
fn spread_evenly(schedule: &mut Schedule, targets: &[usize], hours: f64, max_daily_hours: f64) -> Allocation {
    let mut given = vec![0.0f64; targets.len()];
    let mut remaining = hours;

    // Each round either places everything or caps at least one more day.
    for _ in 0..=targets.len() {
        if remaining <= HOURS_EPSILON {
            break;
        }
        let open: Vec<usize> = (0..targets.len())
            .filter(|&i| schedule.days[targets[i]].capacity(max_daily_hours) > HOURS_EPSILON)
            .collect();
        if open.is_empty() {
            break;
        }

        let share = remaining / open.len() as f64;
        for i in open {
            let day = &mut schedule.days[targets[i]];
            let give = share.min(day.capacity(max_daily_hours));
            day.adjusted_hours += give;
            given[i] += give;
            remaining -= give;
        }
    }

    collect_allocation(schedule, targets, &given, remaining)
}

/// Fill `targets` one at a time in date order up to the ceiling
fn fill_in_order(schedule: &mut Schedule, targets: &[usize], hours: f64, max_daily_hours: f64) -> Allocation {
    let mut given = vec![0.0f64; targets.len()];
    let mut remaining = hours;

    for (i, &index) in targets.iter().enumerate() {
        if remaining <= HOURS_EPSILON {
            break;
        }
        let day = &mut schedule.days[index];
        let give = remaining.min(day.capacity(max_daily_hours));
        day.adjusted_hours += give;
        given[i] = give;
        remaining -= give;
    }

    collect_allocation(schedule, targets, &given, remaining)
}

fn collect_allocation(schedule: &Schedule, targets: &[usize], given: &[f64], remaining: f64) -> Allocation {
    let placements = targets
        .iter()
        .zip(given)
        .filter(|(_, hours)| **hours > 0.0)
        .map(|(&index, &hours)| Placement {
            index,
            date: schedule.days[index].date,
            hours,
        })
        .collect();

    Allocation {
        placements,
        unplaced: remaining.max(0.0),
    }
}

fn note_received(schedule: &mut Schedule, allocation: &Allocation, source_date: NaiveDate, now: DateTime<Utc>) {
    for placement in &allocation.placements {
        schedule.days[placement.index].action_history.push(ActionRecord {
            action: ActionKind::Received,
            original_date: source_date,
            new_date: Some(placement.date),
            hours_redistributed: Some(placement.hours),
            reason: None,
            timestamp: now,
        });
    }
}

/// Replace the outstanding remainder of `index` with what the allocation
/// could not place, resolving the day when nothing is left.
fn settle_remainder(
    schedule: &mut Schedule,
    index: usize,
    allocation: &Allocation,
    resolved: SessionStatus,
    now: DateTime<Utc>,
) {
    let source_date = schedule.days[index].date;
    schedule.unredistributed.retain(|r| r.source_index != index);

    if allocation.unplaced > HOURS_EPSILON {
        schedule.unredistributed.push(Remainder {
            source_index: index,
            source_date,
            hours: allocation.unplaced,
            recorded_at: now,
        });
    } else {
        schedule.days[index].status = resolved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health_metrics::Intensity;
    use crate::planner::PlanRecommendation;
    use proptest::prelude::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule(days: usize, planned: f64) -> Schedule {
        let plan_days = (0..days)
            .map(|i| DaySession::new(i, date(1) + Duration::days(i as i64), planned))
            .collect();
        Schedule {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            goal_id: Uuid::new_v4(),
            intensity: Intensity::Moderate,
            daily_hours: planned,
            recommendation: PlanRecommendation::Burn {
                daily_calorie_target: 500.0,
                calories_per_hour: 560.0,
            },
            days: plan_days,
            missed_count: 0,
            total_missed_hours: 0.0,
            emergency_catch_up: false,
            is_active: true,
            unredistributed: Vec::new(),
            engagement: Default::default(),
            version: 0,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn adjuster(horizon: Option<u32>) -> ScheduleAdjuster {
        ScheduleAdjuster::new(AdjusterConfig {
            window: RedistributionWindow {
                include_today: true,
                horizon_days: horizon,
            },
            ..AdjusterConfig::default()
        })
    }

    /// Window that never contains a day, so every miss leaves a remainder
    fn closed_window() -> ScheduleAdjuster {
        ScheduleAdjuster::new(AdjusterConfig {
            window: RedistributionWindow {
                include_today: false,
                horizon_days: Some(1),
            },
            ..AdjusterConfig::default()
        })
    }

    fn missed_required(schedule: &Schedule) -> f64 {
        schedule
            .days
            .iter()
            .filter(|d| d.status.was_missed())
            .map(|d| d.required_hours())
            .sum()
    }

    #[test]
    fn test_missed_day_three_spreads_over_next_three_days() {
        // 10-day plan, day 3 (index 2) missed, today is day 4, window covers days 4-6
        let mut s = schedule(10, 1.5);
        s.days[0].status = SessionStatus::Completed;
        s.days[1].status = SessionStatus::Completed;

        let report = adjuster(Some(3)).reconcile(&mut s, date(4), now());

        assert_eq!(report.newly_missed, vec![2]);
        assert_eq!(s.days[2].status, SessionStatus::Redistributed);
        for index in 3..6 {
            assert!((s.days[index].adjusted_hours - 0.5).abs() < 1e-9);
            assert!((s.days[index].required_hours() - 2.0).abs() < 1e-9);
        }
        assert!(s.days[6..].iter().all(|d| d.adjusted_hours == 0.0));
        assert_eq!(s.missed_count, 1);
        assert!((s.total_missed_hours - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut s = schedule(10, 1.0);
        let adj = adjuster(None);

        let first = adj.reconcile(&mut s, date(5), now());
        let snapshot = (s.missed_count, s.total_missed_hours, s.total_adjusted());
        let second = adj.reconcile(&mut s, date(5), now());

        assert_eq!(first.newly_missed, vec![0, 1, 2, 3]);
        assert!(!second.changed());
        assert_eq!(snapshot, (s.missed_count, s.total_missed_hours, s.total_adjusted()));
    }

    #[test]
    fn test_empty_window_keeps_remainder() {
        let mut s = schedule(3, 1.0);
        let report = adjuster(None).reconcile(&mut s, date(10), now());

        assert_eq!(report.newly_missed.len(), 3);
        assert!((report.hours_unplaced - 3.0).abs() < 1e-9);
        assert_eq!(s.unredistributed.len(), 3);
        assert!(s.days.iter().all(|d| d.status == SessionStatus::Missed));
        assert!((s.total_unredistributed() - s.total_missed_hours).abs() < 1e-9);
    }

    #[test]
    fn test_ceiling_cascades_and_never_overshoots() {
        // 3h planned, 3.5h ceiling: each target has 0.5h of room
        let mut s = schedule(4, 3.0);
        let report = adjuster(None).reconcile(&mut s, date(2), now());

        assert_eq!(report.newly_missed, vec![0]);
        for day in &s.days[1..] {
            assert!(day.required_hours() <= 3.5 + 1e-9);
            assert!((day.adjusted_hours - 0.5).abs() < 1e-9);
        }
        assert!((report.hours_unplaced - 1.5).abs() < 1e-9);
        assert_eq!(s.days[0].status, SessionStatus::Missed);
        assert!((s.remainder_for(0) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_overflow_respreads_to_days_with_room() {
        let mut s = schedule(4, 1.0);
        s.days[1].planned_hours = 3.4;
        let report = adjuster(None).reconcile(&mut s, date(2), now());

        assert!(report.hours_unplaced < 1e-9);
        assert!((s.days[1].adjusted_hours - 0.1).abs() < 1e-9);
        assert!((s.days[2].adjusted_hours - 0.45).abs() < 1e-9);
        assert!((s.days[3].adjusted_hours - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_flag_at_threshold() {
        let mut s = schedule(10, 1.0);
        let adj = adjuster(None);

        adj.reconcile(&mut s, date(5), now());
        assert!(!s.emergency_catch_up);

        let report = adj.reconcile(&mut s, date(6), now());
        assert!(report.emergency_triggered);
        assert!(s.emergency_catch_up);
        assert_eq!(s.missed_count, 5);
    }

    #[test]
    fn test_reschedule_moves_outstanding_hours() {
        let mut s = schedule(3, 1.0);
        let adj = adjuster(Some(1));
        // The only day inside the window is already done
        s.days[2].status = SessionStatus::Completed;
        adj.reconcile(&mut s, date(3), now());
        assert_eq!(s.days[0].status, SessionStatus::Missed);

        s.days.push(DaySession::new(3, date(4), 1.0));
        let allocation = adj
            .reschedule(&mut s, 0, date(4), Some("travel".to_string()), date(3), now())
            .unwrap();

        assert!((allocation.placed() - 1.0).abs() < 1e-9);
        assert_eq!(s.days[0].status, SessionStatus::Rescheduled);
        assert!(s.days[0].is_rescheduled);
        assert!((s.days[3].adjusted_hours - 1.0).abs() < 1e-9);
        assert!((s.remainder_for(0)).abs() < 1e-9);
        assert_eq!(s.engagement.streak, 1);

        let record = s.days[0].action_history.last().unwrap();
        assert_eq!(record.action, ActionKind::Reschedule);
        assert_eq!(record.original_date, date(1));
        assert_eq!(record.new_date, Some(date(4)));
    }

    #[test]
    fn test_reschedule_requires_missed_status() {
        let mut s = schedule(5, 1.0);
        let err = adjuster(None)
            .reschedule(&mut s, 0, date(3), None, date(1), now())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidTransition { .. }));
    }

    #[test]
    fn test_manual_redistribute_by_count() {
        let mut s = schedule(6, 1.0);
        let adj = closed_window();
        adj.reconcile(&mut s, date(2), now());
        assert_eq!(s.days[0].status, SessionStatus::Missed);

        let allocation = adj
            .redistribute(
                &mut s,
                0,
                &RedistributeTargets::Count(2),
                Some("busy week".to_string()),
                date(2),
                now(),
            )
            .unwrap();

        // Today is excluded by the window, so the next two days take the hours
        assert_eq!(allocation.placements.len(), 2);
        assert_eq!(allocation.placements[0].index, 2);
        assert_eq!(allocation.placements[1].index, 3);
        assert!((s.days[2].adjusted_hours - 0.5).abs() < 1e-9);
        assert_eq!(s.days[0].status, SessionStatus::Redistributed);
        assert!(s.days[0].is_redistributed);
        let record = s.days[0].action_history.last().unwrap();
        assert_eq!(record.action, ActionKind::Redistribute);
        assert_eq!(record.reason.as_deref(), Some("busy week"));
        assert_eq!(record.hours_redistributed, Some(1.0));
    }

    #[test]
    fn test_manual_redistribute_rejects_past_dates() {
        let mut s = schedule(6, 1.0);
        let adj = closed_window();
        adj.reconcile(&mut s, date(3), now());

        let err = adj
            .redistribute(&mut s, 0, &RedistributeTargets::Dates(vec![date(2)]), None, date(3), now())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Validation(_)));

        let err = adj
            .redistribute(&mut s, 0, &RedistributeTargets::Count(0), None, date(3), now())
            .unwrap_err();
        assert!(matches!(err, ScheduleError::Validation(_)));
    }

    #[test]
    fn test_catch_up_consumes_all_missed_sessions() {
        let mut s = schedule(8, 0.5);
        let adj = closed_window();

        adj.reconcile(&mut s, date(6), now());
        adj.reconcile(&mut s, date(6), now());
        assert_eq!(s.missed_count, 5);
        assert!(s.emergency_catch_up);
        assert!((s.total_unredistributed() - 2.5).abs() < 1e-9);

        let allocation = adj.emergency_catch_up(&mut s, date(6), now()).unwrap();
        assert_eq!(allocation.placements.len(), 1);
        assert_eq!(allocation.placements[0].index, 5);
        assert!((s.days[5].required_hours() - 3.0).abs() < 1e-9);
        assert!(s.days[..5].iter().all(|d| d.status == SessionStatus::Catchup));
        assert!(s.unredistributed.is_empty());
        assert!(!s.emergency_catch_up);

        let err = adj.emergency_catch_up(&mut s, date(6), now()).unwrap_err();
        assert_eq!(err, ScheduleError::NothingToCatchUp);
    }

    #[test]
    fn test_catch_up_with_every_day_at_ceiling_keeps_flag() {
        let mut s = schedule(4, 3.5);
        let adj = ScheduleAdjuster::new(AdjusterConfig {
            emergency_threshold: 1,
            window: RedistributionWindow {
                include_today: false,
                horizon_days: None,
            },
            ..AdjusterConfig::default()
        });

        adj.reconcile(&mut s, date(2), now());
        assert!(s.emergency_catch_up);
        assert!((s.total_unredistributed() - 3.5).abs() < 1e-9);
        let before = s.clone();

        let err = adj.emergency_catch_up(&mut s, date(2), now()).unwrap_err();
        assert_eq!(err, ScheduleError::NoCapacity);
        assert_eq!(s, before);
        assert!(s.emergency_catch_up);
        assert_eq!(s.engagement, before.engagement);
        assert_eq!(s.days[0].status, SessionStatus::Missed);
    }

    #[test]
    fn test_log_completion_transitions_once_required_met() {
        let mut s = schedule(3, 1.0);
        let adj = adjuster(None);

        let progress = adj.log_completion(&mut s, 0, 0.6, now()).unwrap();
        assert!(!progress.completed_now);
        assert_eq!(progress.status, SessionStatus::Pending);

        let progress = adj.log_completion(&mut s, 0, 0.4, now()).unwrap();
        assert!(progress.completed_now);
        assert_eq!(s.days[0].status, SessionStatus::Completed);

        assert!(adj.log_completion(&mut s, 0, 25.0, now()).is_err());
        assert!(matches!(
            adj.log_completion(&mut s, 9, 1.0, now()),
            Err(ScheduleError::DayNotFound(9))
        ));
    }

    #[test]
    fn test_live_progress_is_replayable() {
        let mut s = schedule(3, 1.0);
        let adj = adjuster(None);
        let session = Uuid::new_v4();

        adj.record_live_progress(&mut s, date(2), session, 0.5, 200.0, now()).unwrap();
        adj.record_live_progress(&mut s, date(2), session, 0.5, 200.0, now()).unwrap();
        assert!((s.days[1].completed_hours - 0.5).abs() < 1e-9);

        let progress = adj
            .record_live_progress(&mut s, date(2), session, 1.0, 400.0, now())
            .unwrap();
        assert!(progress.completed_now);
        assert!((s.days[1].calories_burned - 400.0).abs() < 1e-9);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Σ adjusted + Σ remainders == Σ required of missed days, and no
        /// day exceeds the ceiling, across any run of reconciliations,
        /// completions and user actions
        #[test]
        fn prop_hours_are_conserved(
            days in 2usize..20,
            planned in 0.1f64..3.5,
            max_hours in 3.5f64..5.0,
            horizon in proptest::option::of(1u32..6),
            include_today in any::<bool>(),
            steps in prop::collection::vec((0u8..4, 0usize..20, 1u32..3), 1..25)
        ) {
            let adj = ScheduleAdjuster::new(AdjusterConfig {
                max_daily_hours: max_hours,
                emergency_threshold: 5,
                window: RedistributionWindow { include_today, horizon_days: horizon },
            });
            let mut s = schedule(days, planned);
            let mut today = date(1);

            for (op, index, advance) in steps {
                let index = index % days;
                match op {
                    0 => {
                        today += Duration::days(i64::from(advance));
                        adj.reconcile(&mut s, today, now());
                    }
                    1 => { let _ = adj.log_completion(&mut s, index, planned, now()); }
                    2 => {
                        let _ = adj.redistribute(&mut s, index, &RedistributeTargets::Count(advance as usize), None, today, now());
                    }
                    _ => { let _ = adj.emergency_catch_up(&mut s, today, now()); }
                }

                let lhs = s.total_adjusted() + s.total_unredistributed();
                prop_assert!((lhs - missed_required(&s)).abs() < 1e-6,
                    "adjusted {} + remainders {} != missed {}",
                    s.total_adjusted(), s.total_unredistributed(), missed_required(&s));
                for day in &s.days {
                    if day.adjusted_hours > 0.0 {
                        prop_assert!(day.required_hours() <= max_hours + 1e-6);
                    }
                }
            }
        }

        /// Reconciling twice on the same day never double counts
        #[test]
        fn prop_reconcile_idempotent(days in 1usize..25, planned in 0.1f64..3.5, offset in 0u32..28) {
            let adj = adjuster(None);
            let mut s = schedule(days, planned);
            let today = date(1) + Duration::days(i64::from(offset));

            adj.reconcile(&mut s, today, now());
            let first = s.clone();
            let report = adj.reconcile(&mut s, today, now());

            prop_assert!(!report.changed());
            prop_assert_eq!(first.missed_count, s.missed_count);
            prop_assert_eq!(first.total_missed_hours, s.total_missed_hours);
            prop_assert_eq!(first.days, s.days);
        }
    }
}
