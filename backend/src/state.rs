//! Application state management
//!
//! Shared state handed to every handler through Axum's state extraction.
//! All fields are cheap to clone.

use crate::config::AppConfig;
use crate::services::Services;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Arc<AppConfig>,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Present when running against PostgreSQL; used by the readiness probe
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(services: Services, config: AppConfig) -> Self {
        Self {
            services,
            config: Arc::new(config),
            metrics: None,
            db: None,
        }
    }

    pub fn with_db(mut self, pool: PgPool) -> Self {
        self.db = Some(pool);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
