//! Profile and goal lookups against tables owned by the profile service

use super::{StoreError, StoreResult, UserDirectory};
use async_trait::async_trait;
use chrono::NaiveDate;
use fitcoach_shared::{Goal, Profile};
use sqlx::PgPool;
use uuid::Uuid;

/// Profile record from database
#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    weight_kg: f64,
    height_cm: f64,
    birth_date: NaiveDate,
    sex: String,
    activity_level: String,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = StoreError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Profile {
            weight_kg: row.weight_kg,
            height_cm: row.height_cm,
            birth_date: row.birth_date,
            sex: row.sex.parse().map_err(StoreError::InvalidRecord)?,
            activity_level: row
                .activity_level
                .parse()
                .map_err(StoreError::InvalidRecord)?,
        })
    }
}

/// Goal record from database
#[derive(Debug, sqlx::FromRow)]
struct GoalRow {
    id: Uuid,
    user_id: Uuid,
    current_weight_kg: f64,
    target_weight_kg: f64,
    goal_type: String,
    target_date: NaiveDate,
}

impl TryFrom<GoalRow> for Goal {
    type Error = StoreError;

    fn try_from(row: GoalRow) -> Result<Self, Self::Error> {
        Ok(Goal {
            id: row.id,
            user_id: row.user_id,
            current_weight_kg: row.current_weight_kg,
            target_weight_kg: row.target_weight_kg,
            goal_type: row.goal_type.parse().map_err(StoreError::InvalidRecord)?,
            target_date: row.target_date,
        })
    }
}

/// PostgreSQL-backed user directory
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            SELECT weight_kg, height_cm, birth_date, sex, activity_level
            FROM user_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Profile::try_from).transpose()
    }

    async fn goal(&self, user_id: Uuid, goal_id: Uuid) -> StoreResult<Option<Goal>> {
        let row = sqlx::query_as::<_, GoalRow>(
            r#"
            SELECT id, user_id, current_weight_kg, target_weight_kg, goal_type, target_date
            FROM goals
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(goal_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Goal::try_from).transpose()
    }

    async fn active_goal(&self, user_id: Uuid) -> StoreResult<Option<Goal>> {
        let row = sqlx::query_as::<_, GoalRow>(
            r#"
            SELECT id, user_id, current_weight_kg, target_weight_kg, goal_type, target_date
            FROM goals
            WHERE user_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Goal::try_from).transpose()
    }
}
