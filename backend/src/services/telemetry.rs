//! Telemetry ingest and buffered persistence
//!
//! Samples are queued per device and written in batches, either when a queue
//! reaches the configured size or on the flush tick. Delivery to storage is
//! at-least-once: a failed batch goes back to the front of its queue and
//! waits for the next tick. Each queue is capped; during a long outage the
//! oldest samples are dropped and counted.

use crate::clock::Clock;
use crate::error::ApiResult;
use crate::repositories::TelemetryStore;
use crate::services::broadcast::{Broadcaster, SubscriptionKey};
use crate::services::sessions::SessionTracker;
use dashmap::DashMap;
use fitcoach_shared::telemetry::normalize;
use fitcoach_shared::{LiveServerMessage, TelemetryAccepted, TelemetrySample};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct DeviceQueue {
    samples: VecDeque<TelemetrySample>,
    /// Set after a failed write; size-triggered writes wait for the flush tick
    retry_pending: bool,
}

impl DeviceQueue {
    /// Drop the oldest samples beyond `cap`; returns how many were dropped
    fn trim_to(&mut self, cap: usize) -> usize {
        let excess = self.samples.len().saturating_sub(cap);
        self.samples.drain(..excess);
        excess
    }
}

pub struct TelemetryIngest {
    store: Arc<dyn TelemetryStore>,
    sessions: Arc<SessionTracker>,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<dyn Clock>,
    max_samples: usize,
    max_queued: usize,
    queues: DashMap<String, DeviceQueue>,
}

impl TelemetryIngest {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        sessions: Arc<SessionTracker>,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<dyn Clock>,
        max_samples: usize,
        max_queued: usize,
    ) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            store,
            sessions,
            broadcaster,
            clock,
            max_samples,
            max_queued: max_queued.max(max_samples),
            queues: DashMap::new(),
        }
    }

    /// Accept one raw sample.
    ///
    /// Only a payload without a device id or metrics is rejected. Storage and
    /// fanout problems are logged and never fail the call.
    pub async fn ingest(&self, raw: &Value) -> ApiResult<TelemetryAccepted> {
        let sample = match normalize(raw, self.clock.now()) {
            Ok(sample) => sample,
            Err(e) => {
                metrics::counter!("telemetry_samples_rejected_total").increment(1);
                debug!(error = %e, "Rejected telemetry sample");
                return Err(e.into());
            }
        };
        metrics::counter!("telemetry_samples_ingested_total").increment(1);

        self.enqueue(sample.clone()).await;

        let session = self.sessions.apply_sample(&sample).await;
        let session_id = session.as_ref().map(|s| s.id).or(sample.session_id);

        let update = LiveServerMessage::TelemetryUpdate {
            device_id: sample.device_id.clone(),
            session_id,
            metrics: sample.metrics.clone(),
            battery: sample.battery,
            timestamp: sample.received_at,
        };
        self.broadcaster
            .publish(&SubscriptionKey::Device(sample.device_id.clone()), session_id, &update)
            .await;
        if let Some(session) = &session {
            self.broadcaster
                .publish(&SubscriptionKey::User(session.user_id), session_id, &update)
                .await;
        }

        Ok(TelemetryAccepted {
            accepted: true,
            session_active: session.is_some(),
            session_id: session.map(|s| s.id),
        })
    }

    /// Write every non-empty queue; returns the number of samples persisted
    pub async fn flush_all(&self) -> usize {
        let devices: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();

        let mut written = 0;
        for device_id in devices {
            let batch: Vec<TelemetrySample> = match self.queues.get_mut(&device_id) {
                Some(mut queue) => queue.samples.drain(..).collect(),
                None => continue,
            };
            if !batch.is_empty() {
                written += self.write(&device_id, batch).await;
            }
        }
        self.queues.retain(|_, queue| !queue.samples.is_empty());
        written
    }

    /// Samples waiting to be written
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.value().samples.len()).sum()
    }

    async fn enqueue(&self, sample: TelemetrySample) {
        let device_id = sample.device_id.clone();
        let (full_batch, dropped) = {
            let mut queue = self.queues.entry(device_id.clone()).or_default();
            queue.samples.push_back(sample);
            let dropped = queue.trim_to(self.max_queued);
            let ready = !queue.retry_pending && queue.samples.len() >= self.max_samples;
            (ready.then(|| queue.samples.drain(..).collect::<Vec<_>>()), dropped)
        };

        if dropped > 0 {
            record_dropped(&device_id, dropped);
        }
        if let Some(batch) = full_batch {
            self.write(&device_id, batch).await;
        }
    }

    async fn write(&self, device_id: &str, batch: Vec<TelemetrySample>) -> usize {
        match self.store.write_batch(&batch).await {
            Ok(()) => {
                metrics::counter!("telemetry_flush_batches_total").increment(1);
                debug!(device_id, samples = batch.len(), "Telemetry batch written");
                if let Some(mut queue) = self.queues.get_mut(device_id) {
                    queue.retry_pending = false;
                }
                batch.len()
            }
            Err(e) => {
                metrics::counter!("telemetry_flush_failures_total").increment(1);
                warn!(device_id, samples = batch.len(), error = %e, "Telemetry flush failed, requeueing");
                let dropped = {
                    let mut queue = self.queues.entry(device_id.to_string()).or_default();
                    for sample in batch.into_iter().rev() {
                        queue.samples.push_front(sample);
                    }
                    queue.retry_pending = true;
                    queue.trim_to(self.max_queued)
                };
                if dropped > 0 {
                    record_dropped(device_id, dropped);
                }
                0
            }
        }
    }
}

fn record_dropped(device_id: &str, dropped: usize) {
    metrics::counter!("telemetry_samples_dropped_total").increment(dropped as u64);
    warn!(device_id, dropped, "Telemetry queue full, dropped oldest samples");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repositories::{MemoryStore, StoreError, StoreResult};
    use crate::services::broadcast::LocalBackplane;
    use crate::services::plans::PlanService;
    use chrono::NaiveDate;
    use chrono::Utc;
    use fitcoach_shared::{AdjusterConfig, Intensity, PlannerConfig, SampleMetrics, ScheduleAdjuster};
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn ingest_with(store: Arc<MemoryStore>, max_samples: usize) -> TelemetryIngest {
        ingest_over(store.clone(), store, max_samples, 10_000)
    }

    fn ingest_over(
        store: Arc<MemoryStore>,
        sink: Arc<dyn TelemetryStore>,
        max_samples: usize,
        max_queued: usize,
    ) -> TelemetryIngest {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()));
        let plans = Arc::new(PlanService::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            PlannerConfig::default(),
            ScheduleAdjuster::new(AdjusterConfig::default()),
            Intensity::Moderate,
        ));
        let sessions = Arc::new(SessionTracker::new(
            store.clone(),
            store,
            plans,
            clock.clone(),
            Intensity::Moderate,
            20,
        ));
        let broadcaster = Arc::new(Broadcaster::new(Arc::new(LocalBackplane), 16));
        TelemetryIngest::new(sink, sessions, broadcaster, clock, max_samples, max_queued)
    }

    /// Sink that counts write attempts and fails while `failing` is set
    #[derive(Default)]
    struct CountingSink {
        failing: AtomicBool,
        attempts: AtomicUsize,
        rows: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TelemetryStore for CountingSink {
        async fn write_batch(&self, samples: &[TelemetrySample]) -> StoreResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.rows.fetch_add(samples.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    fn raw(device: &str, elapsed: u32) -> Value {
        json!({
            "deviceId": device,
            "metrics": { "speed": 20, "distance": elapsed * 5, "elapsedTime": elapsed, "power": 150 }
        })
    }

    #[tokio::test]
    async fn test_full_queue_flushes_immediately() {
        let store = Arc::new(MemoryStore::new());
        let ingest = ingest_with(store.clone(), 100);

        for i in 0..150 {
            ingest.ingest(&raw("bike-1", i)).await.unwrap();
        }
        assert_eq!(store.telemetry_batches().await, vec![100]);
        assert_eq!(ingest.pending(), 50);

        assert_eq!(ingest.flush_all().await, 50);
        assert_eq!(store.telemetry_batches().await, vec![100, 50]);
        assert_eq!(ingest.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let ingest = ingest_with(store.clone(), 100);

        for i in 0..3 {
            ingest.ingest(&raw("bike-1", i)).await.unwrap();
        }
        store.set_fail_telemetry_writes(true);
        assert_eq!(ingest.flush_all().await, 0);
        assert_eq!(ingest.pending(), 3);

        ingest.ingest(&raw("bike-1", 3)).await.unwrap();
        store.set_fail_telemetry_writes(false);
        assert_eq!(ingest.flush_all().await, 4);
        assert_eq!(store.stored_samples().await, 4);
    }

    #[tokio::test]
    async fn test_outage_waits_for_tick_and_caps_queue() {
        let sink = Arc::new(CountingSink::default());
        sink.failing.store(true, Ordering::SeqCst);
        let ingest = ingest_over(Arc::new(MemoryStore::new()), sink.clone(), 100, 500);

        for i in 0..1000 {
            ingest.ingest(&raw("bike-1", i)).await.unwrap();
        }
        // One size-triggered attempt, then nothing until the tick
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(ingest.pending(), 500);

        assert_eq!(ingest.flush_all().await, 0);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(ingest.pending(), 500);

        sink.failing.store(false, Ordering::SeqCst);
        assert_eq!(ingest.flush_all().await, 500);
        assert_eq!(sink.rows.load(Ordering::SeqCst), 500);

        // Size-triggered writes resume after a successful write
        for i in 0..100 {
            ingest.ingest(&raw("bike-1", i)).await.unwrap();
        }
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(ingest.pending(), 0);
    }

    #[tokio::test]
    async fn test_queues_are_per_device() {
        let store = Arc::new(MemoryStore::new());
        let ingest = ingest_with(store.clone(), 2);

        ingest.ingest(&raw("bike-1", 1)).await.unwrap();
        ingest.ingest(&raw("bike-2", 1)).await.unwrap();
        assert!(store.telemetry_batches().await.is_empty());

        ingest.ingest(&raw("bike-1", 2)).await.unwrap();
        assert_eq!(store.telemetry_batches().await, vec![2]);
        assert_eq!(ingest.pending(), 1);
    }

    #[tokio::test]
    async fn test_rejects_payload_without_device() {
        let ingest = ingest_with(Arc::new(MemoryStore::new()), 100);
        let result = ingest.ingest(&json!({ "metrics": { "speed": 1 } })).await;
        assert!(result.is_err());
        assert_eq!(ingest.pending(), 0);
    }

    #[tokio::test]
    async fn test_publishes_to_device_subscribers() {
        let store = Arc::new(MemoryStore::new());
        let ingest = ingest_with(store, 100);
        let (id, mut rx) = ingest.broadcaster.connect();
        ingest
            .broadcaster
            .subscribe(id, SubscriptionKey::Device("bike-1".to_string()), None);

        let accepted = ingest.ingest(&raw("bike-1", 5)).await.unwrap();
        assert!(accepted.accepted);
        assert!(!accepted.session_active);

        let message: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(message["type"], "telemetry_update");
        assert_eq!(message["deviceId"], "bike-1");
        assert_eq!(message["metrics"]["elapsedTime"], 5.0);
    }

    fn queued(elapsed: usize) -> TelemetrySample {
        TelemetrySample {
            device_id: "bike-1".to_string(),
            session_id: None,
            metrics: SampleMetrics {
                elapsed_time: elapsed as f64,
                ..SampleMetrics::default()
            },
            battery: None,
            received_at: Utc::now(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_trim_keeps_newest_samples(pushed in 0usize..300, cap in 1usize..120) {
            let mut queue = DeviceQueue::default();
            let mut dropped = 0;
            for i in 0..pushed {
                queue.samples.push_back(queued(i));
                dropped += queue.trim_to(cap);
            }

            let kept = pushed.min(cap);
            prop_assert_eq!(queue.samples.len(), kept);
            prop_assert_eq!(dropped, pushed - kept);
            if let Some(oldest) = queue.samples.front() {
                prop_assert_eq!(oldest.metrics.elapsed_time, (pushed - kept) as f64);
            }
        }
    }
}
