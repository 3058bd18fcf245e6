use super::source::{SummarySlot, SummarySource};
use crate::config::TelemetryCacheConfig;
use crate::metrics::TelemetryCacheMetrics;
use crate::policy::{FreshnessState, Telemetry};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct SlotState {
    value: Option<Telemetry>,
    fetched_at: Option<Instant>,
}

/// One slot's answer to `getAdaptiveTelemetry`: the last-known-good
/// value, freshness classification, and age (`spec.md` §4.E).
#[derive(Debug, Clone, Copy)]
pub struct SummarySnapshot {
    pub telemetry: Option<Telemetry>,
    pub freshness: FreshnessState,
    pub age: Option<Duration>,
}

/// Pull-through singleflight cache over the two telemetry-summary
/// upstreams. Locking the per-slot mutex for the whole
/// check-then-maybe-fetch sequence is what makes the singleflight
/// property hold: a second caller arriving while a fetch is in flight
/// simply waits for the same lock, then reads whatever the first caller
/// just wrote - `spec.md` §4.E: "only one upstream request per slot at a
/// time."
pub struct SummaryCache {
    config: TelemetryCacheConfig,
    source: Arc<dyn SummarySource>,
    slots: HashMap<SummarySlot, Mutex<SlotState>>,
    metrics: Arc<TelemetryCacheMetrics>,
}

impl SummaryCache {
    pub fn new(
        config: TelemetryCacheConfig,
        source: Arc<dyn SummarySource>,
        metrics: Arc<TelemetryCacheMetrics>,
    ) -> Self {
        let mut slots = HashMap::new();
        slots.insert(
            SummarySlot::Callback,
            Mutex::new(SlotState {
                value: None,
                fetched_at: None,
            }),
        );
        slots.insert(
            SummarySlot::Scheduler,
            Mutex::new(SlotState {
                value: None,
                fetched_at: None,
            }),
        );
        Self {
            config,
            source,
            slots,
            metrics,
        }
    }

    pub async fn get(&self, slot: SummarySlot) -> SummarySnapshot {
        let mutex = self.slots.get(&slot).expect("every slot is pre-registered");
        let mut state = mutex.lock().await;
        let now = Instant::now();

        let needs_fetch = match state.fetched_at {
            None => true,
            Some(fetched_at) => now.duration_since(fetched_at) > self.config.ttl,
        };

        if needs_fetch {
            match self.source.fetch(slot).await {
                Ok(value) => {
                    self.metrics.cache_misses_total.fetch_add(1, Ordering::Relaxed);
                    state.value = Some(value);
                    state.fetched_at = Some(now);
                }
                Err(e) => {
                    self.metrics.upstream_failures_total.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(?slot, error = %e, "telemetry summary fetch failed, serving stale");
                    if state.value.is_some() {
                        self.metrics.served_stale_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        } else {
            self.metrics.cache_hits_total.fetch_add(1, Ordering::Relaxed);
        }

        let age = state.fetched_at.map(|t| now.duration_since(t));
        let freshness = classify(age, &self.config);
        SummarySnapshot {
            telemetry: state.value,
            freshness,
            age,
        }
    }
}

fn classify(age: Option<Duration>, config: &TelemetryCacheConfig) -> FreshnessState {
    match age {
        None => FreshnessState::Missing,
        Some(age) if age <= config.ttl => FreshnessState::Fresh,
        Some(age) if age <= config.stale_soft => FreshnessState::StaleSoft,
        Some(age) if age <= config.stale_hard => FreshnessState::StaleHard,
        Some(_) => FreshnessState::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::source::SummarySourceError;

    struct FixedSource {
        value: tokio::sync::Mutex<Option<Telemetry>>,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl SummarySource for FixedSource {
        async fn fetch(&self, _slot: SummarySlot) -> Result<Telemetry, SummarySourceError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.value
                .lock()
                .await
                .clone()
                .ok_or(SummarySourceError::NotConfigured)
        }
    }

    fn test_config() -> TelemetryCacheConfig {
        TelemetryCacheConfig {
            ttl: Duration::from_millis(10),
            stale_soft: Duration::from_millis(50),
            stale_hard: Duration::from_millis(200),
            callback_summary_url: None,
            scheduler_summary_url: None,
            fetch_timeout: Duration::from_secs(1),
            stale_soft_dampening: 0.45,
        }
    }

    #[tokio::test]
    async fn serves_cached_value_within_ttl() {
        let source = Arc::new(FixedSource {
            value: tokio::sync::Mutex::new(Some(Telemetry::default())),
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let cache = SummaryCache::new(test_config(), source.clone(), Arc::new(TelemetryCacheMetrics::default()));
        let snap1 = cache.get(SummarySlot::Callback).await;
        let snap2 = cache.get(SummarySlot::Callback).await;
        assert!(matches!(snap1.freshness, FreshnessState::Fresh));
        assert!(matches!(snap2.freshness, FreshnessState::Fresh));
        assert_eq!(source.calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn serves_stale_on_upstream_failure() {
        let source = Arc::new(FixedSource {
            value: tokio::sync::Mutex::new(Some(Telemetry::default())),
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let cache = SummaryCache::new(test_config(), source.clone(), Arc::new(TelemetryCacheMetrics::default()));
        let _ = cache.get(SummarySlot::Callback).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        *source.value.lock().await = None;
        let snap = cache.get(SummarySlot::Callback).await;
        assert!(snap.telemetry.is_some());
        assert!(matches!(snap.freshness, FreshnessState::StaleSoft));
    }

    #[tokio::test]
    async fn missing_once_age_exceeds_stale_hard() {
        let source = Arc::new(FixedSource {
            value: tokio::sync::Mutex::new(Some(Telemetry::default())),
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let cache = SummaryCache::new(test_config(), source.clone(), Arc::new(TelemetryCacheMetrics::default()));
        let _ = cache.get(SummarySlot::Callback).await;
        tokio::time::sleep(Duration::from_millis(210)).await;
        *source.value.lock().await = None;
        let snap = cache.get(SummarySlot::Callback).await;
        assert!(snap.telemetry.is_some());
        assert!(matches!(snap.freshness, FreshnessState::Missing));
    }

    #[tokio::test]
    async fn missing_when_never_fetched_successfully() {
        let source = Arc::new(FixedSource {
            value: tokio::sync::Mutex::new(None),
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let cache = SummaryCache::new(test_config(), source, Arc::new(TelemetryCacheMetrics::default()));
        let snap = cache.get(SummarySlot::Callback).await;
        assert!(matches!(snap.freshness, FreshnessState::Missing));
    }
}
