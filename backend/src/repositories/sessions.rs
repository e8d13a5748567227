//! Live session repository for database operations

use super::{SessionStore, StoreError, StoreResult};
use async_trait::async_trait;
use fitcoach_shared::{DeviceStats, LiveSession, LiveSessionStatus};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

/// PostgreSQL live session store
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &LiveSession) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO live_sessions (id, user_id, device_id, status, document, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.device_id)
        .bind(session.status.as_str())
        .bind(Json(session))
        .bind(session.started_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let existing = self
                    .active_for_user(session.user_id)
                    .await?
                    .map(|s| s.id)
                    .unwrap_or(session.id);
                Err(StoreError::ActiveSessionExists { existing })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<LiveSession>> {
        let doc = sqlx::query_scalar::<_, Json<LiveSession>>(
            "SELECT document FROM live_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(doc.map(|d| d.0))
    }

    async fn active_for_user(&self, user_id: Uuid) -> StoreResult<Option<LiveSession>> {
        let doc = sqlx::query_scalar::<_, Json<LiveSession>>(
            "SELECT document FROM live_sessions WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(doc.map(|d| d.0))
    }

    async fn active_for_device(&self, device_id: &str) -> StoreResult<Option<LiveSession>> {
        let doc = sqlx::query_scalar::<_, Json<LiveSession>>(
            r#"
            SELECT document FROM live_sessions
            WHERE device_id = $1 AND status = 'active'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(doc.map(|d| d.0))
    }

    async fn checkpoint(&self, session: &LiveSession) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE live_sessions
            SET document = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(session.id)
        .bind(Json(session))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn finalize(&self, session: &LiveSession) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE live_sessions
            SET status = $2, document = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(session.id)
        .bind(LiveSessionStatus::Completed.as_str())
        .bind(Json(session))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        let ended_at = session.ended_at.unwrap_or(session.started_at);
        sqlx::query(
            r#"
            INSERT INTO session_history (session_id, user_id, device_id, document, ended_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.device_id)
        .bind(Json(session))
        .bind(ended_at)
        .execute(&mut *tx)
        .await?;

        let current = sqlx::query_scalar::<_, Json<DeviceStats>>(
            "SELECT document FROM device_stats WHERE device_id = $1 FOR UPDATE",
        )
        .bind(&session.device_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut stats = current.map(|d| d.0).unwrap_or_else(|| DeviceStats {
            device_id: session.device_id.clone(),
            ..DeviceStats::default()
        });
        stats.record(session);

        sqlx::query(
            r#"
            INSERT INTO device_stats (device_id, document, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (device_id) DO UPDATE
            SET document = EXCLUDED.document, updated_at = NOW()
            "#,
        )
        .bind(&session.device_id)
        .bind(Json(&stats))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn history_count(&self, session_id: Uuid) -> StoreResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM session_history WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn device_stats(&self, device_id: &str) -> StoreResult<Option<DeviceStats>> {
        let doc = sqlx::query_scalar::<_, Json<DeviceStats>>(
            "SELECT document FROM device_stats WHERE device_id = $1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(doc.map(|d| d.0))
    }
}
