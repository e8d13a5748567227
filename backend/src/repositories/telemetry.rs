//! Raw telemetry repository for database operations

use super::{StoreResult, TelemetryStore};
use async_trait::async_trait;
use fitcoach_shared::TelemetrySample;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Rows per INSERT statement; keeps the bind count well under the protocol limit
const INSERT_CHUNK: usize = 500;

/// PostgreSQL telemetry sink
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn write_batch(&self, samples: &[TelemetrySample]) -> StoreResult<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in samples.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO telemetry_samples (device_id, session_id, metrics, battery, received_at) ",
            );
            builder.push_values(chunk, |mut row, sample| {
                row.push_bind(&sample.device_id)
                    .push_bind(sample.session_id)
                    .push_bind(Json(&sample.metrics))
                    .push_bind(sample.battery)
                    .push_bind(sample.received_at);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(())
    }
}
