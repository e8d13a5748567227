//! Schedules repository for database operations

use super::{ScheduleStore, StoreError, StoreResult};
use async_trait::async_trait;
use fitcoach_shared::Schedule;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// Schedule record from database
#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    version: i64,
    document: Json<Schedule>,
}

impl ScheduleRow {
    /// The version column is authoritative over the copy inside the document
    fn into_schedule(self) -> Schedule {
        let mut schedule = self.document.0;
        schedule.version = self.version;
        schedule
    }
}

/// PostgreSQL schedule store
pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn insert(&self, schedule: &Schedule) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE schedules
            SET is_active = FALSE,
                document = jsonb_set(document, '{isActive}', 'false'::jsonb),
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1 AND is_active
            "#,
        )
        .bind(schedule.user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO schedules (id, user_id, goal_id, is_active, version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.user_id)
        .bind(schedule.goal_id)
        .bind(schedule.is_active)
        .bind(schedule.version)
        .bind(Json(schedule))
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            "SELECT version, document FROM schedules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ScheduleRow::into_schedule))
    }

    async fn active_for_user(&self, user_id: Uuid) -> StoreResult<Option<Schedule>> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT version, document FROM schedules
            WHERE user_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ScheduleRow::into_schedule))
    }

    async fn active_ids(&self) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM schedules WHERE is_active ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn save(&self, schedule: &Schedule) -> StoreResult<i64> {
        let next = schedule.version + 1;
        let mut stored = schedule.clone();
        stored.version = next;

        let updated = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE schedules
            SET document = $2, is_active = $3, version = $4, updated_at = $5
            WHERE id = $1 AND version = $6
            RETURNING version
            "#,
        )
        .bind(schedule.id)
        .bind(Json(&stored))
        .bind(schedule.is_active)
        .bind(next)
        .bind(schedule.updated_at)
        .bind(schedule.version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(version) => Ok(version),
            None => {
                let exists = sqlx::query_scalar::<_, i64>("SELECT version FROM schedules WHERE id = $1")
                    .bind(schedule.id)
                    .fetch_optional(&self.pool)
                    .await?;
                Err(match exists {
                    Some(_) => StoreError::VersionConflict,
                    None => StoreError::NotFound("Schedule"),
                })
            }
        }
    }
}
