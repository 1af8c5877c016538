//! Process-wide cache of the reliability curve.
//!
//! The curve is built lazily from the tracked-prediction history and kept for
//! a bounded TTL. Readers always receive a complete `Arc` snapshot; rebuilds
//! and incremental ingestion go through a single writer and publish a new
//! curve by swapping the pointer, so nobody observes a half-built curve.
//!
//! A rebuild reads at most `max_samples` outcomes. Once ingestion would push
//! the cached curve past that, the entry is dropped instead, so the next
//! snapshot rebuilds over the same window a cold start would.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::db::models::CalibrationSample;
use crate::engine::calibration::ReliabilityCurve;
use crate::error::TrackerResult;

#[derive(Clone)]
pub struct CurveCache {
    current: Arc<RwLock<Option<CachedCurve>>>,
    /// Serializes rebuilds and ingestion
    writer: Arc<Mutex<()>>,
    ttl: Duration,
    min_bin_samples: u64,
    max_samples: u64,
}

#[derive(Clone)]
struct CachedCurve {
    curve: Arc<ReliabilityCurve>,
    built_at: Instant,
}

impl CachedCurve {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.built_at.elapsed() < ttl
    }
}

impl CurveCache {
    pub fn new(ttl: Duration, min_bin_samples: u64, max_samples: u64) -> Self {
        CurveCache {
            current: Arc::new(RwLock::new(None)),
            writer: Arc::new(Mutex::new(())),
            ttl,
            min_bin_samples,
            max_samples: max_samples.max(1),
        }
    }

    /// Current curve, rebuilding from `load` when missing or expired.
    ///
    /// A failed reload keeps serving the previous curve if there is one.
    pub async fn snapshot<F>(&self, load: F) -> TrackerResult<Arc<ReliabilityCurve>>
    where
        F: FnOnce() -> TrackerResult<Vec<CalibrationSample>>,
    {
        if let Some(cached) = self.current.read().await.as_ref() {
            if cached.is_fresh(self.ttl) {
                return Ok(Arc::clone(&cached.curve));
            }
        }

        let _writer = self.writer.lock().await;

        // Another task may have rebuilt while we waited for the writer lock.
        let stale = self.current.read().await.clone();
        if let Some(cached) = &stale {
            if cached.is_fresh(self.ttl) {
                return Ok(Arc::clone(&cached.curve));
            }
        }

        match load() {
            Ok(samples) => {
                let curve = Arc::new(ReliabilityCurve::from_samples(&samples, self.min_bin_samples));
                info!(
                    "Reliability curve rebuilt: {} samples, {} active bins",
                    curve.sample_count(),
                    curve.points().len()
                );
                *self.current.write().await = Some(CachedCurve {
                    curve: Arc::clone(&curve),
                    built_at: Instant::now(),
                });
                Ok(curve)
            }
            Err(e) => match stale {
                Some(cached) => {
                    warn!("Calibration history reload failed, serving stale curve: {}", e);
                    Ok(cached.curve)
                }
                None => Err(e),
            },
        }
    }

    /// Fold a newly resolved outcome into the cached curve without a full
    /// rescan. No-op when nothing is cached yet: the next snapshot reads the
    /// outcome from storage anyway.
    pub async fn ingest(&self, sample: CalibrationSample) {
        let _writer = self.writer.lock().await;
        let mut current = self.current.write().await;
        let Some(cached) = current.as_mut() else {
            return;
        };
        if cached.curve.sample_count() >= self.max_samples {
            // The stored window has moved on; rebuild rather than grow past it.
            *current = None;
            debug!(
                "Reliability curve at {} samples, dropped for rebuild",
                self.max_samples
            );
            return;
        }
        let mut curve = (*cached.curve).clone();
        curve.record(sample);
        cached.curve = Arc::new(curve);
        debug!(
            "Ingested outcome (confidence {:.3}, correct {}) into reliability curve",
            sample.confidence, sample.was_correct
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn history() -> Vec<CalibrationSample> {
        (0..10)
            .map(|i| CalibrationSample {
                confidence: 0.9,
                was_correct: i < 7,
            })
            .collect()
    }

    #[tokio::test]
    async fn builds_once_within_ttl() {
        let cache = CurveCache::new(Duration::from_secs(3600), 5, 1000);
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(history())
        };
        let a = cache.snapshot(load).await.unwrap();
        let b = cache.snapshot(load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn zero_ttl_always_rebuilds() {
        let cache = CurveCache::new(Duration::ZERO, 5, 1000);
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(history())
        };
        cache.snapshot(load).await.unwrap();
        cache.snapshot(load).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ingest_past_the_history_limit_forces_rebuild() {
        let cache = CurveCache::new(Duration::from_secs(3600), 5, 11);
        cache.snapshot(|| Ok(history())).await.unwrap();
        let miss = CalibrationSample {
            confidence: 0.9,
            was_correct: false,
        };

        // 10 → 11 still fits the window
        cache.ingest(miss).await;
        let grown = cache
            .snapshot(|| panic!("fresh cache must not reload"))
            .await
            .unwrap();
        assert_eq!(grown.sample_count(), 11);

        // A twelfth sample would exceed what a rebuild reads
        cache.ingest(miss).await;
        let loads = AtomicUsize::new(0);
        let rebuilt = cache
            .snapshot(|| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(history()[..10].iter().copied().chain([miss]).collect())
            })
            .await
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(rebuilt.sample_count(), 11);
    }

    #[tokio::test]
    async fn ingest_without_cached_curve_is_a_no_op() {
        let cache = CurveCache::new(Duration::from_secs(3600), 5, 1000);
        cache
            .ingest(CalibrationSample {
                confidence: 0.8,
                was_correct: true,
            })
            .await;
        let curve = cache.snapshot(|| Ok(vec![])).await.unwrap();
        assert_eq!(curve.sample_count(), 0);
    }

    #[tokio::test]
    async fn ingest_swaps_in_updated_curve() {
        let cache = CurveCache::new(Duration::from_secs(3600), 5, 1000);
        let before = cache.snapshot(|| Ok(history())).await.unwrap();
        cache
            .ingest(CalibrationSample {
                confidence: 0.9,
                was_correct: false,
            })
            .await;
        let after = cache
            .snapshot(|| panic!("fresh cache must not reload"))
            .await
            .unwrap();
        assert_eq!(before.sample_count(), 10);
        assert_eq!(after.sample_count(), 11);
    }

    #[tokio::test]
    async fn failed_reload_serves_stale_curve() {
        let cache = CurveCache::new(Duration::ZERO, 5, 1000);
        cache.snapshot(|| Ok(history())).await.unwrap();
        let stale = cache
            .snapshot(|| Err(TrackerError::NotFound("history".into())))
            .await
            .unwrap();
        assert_eq!(stale.sample_count(), 10);
    }

    #[tokio::test]
    async fn failed_first_load_propagates() {
        let cache = CurveCache::new(Duration::from_secs(60), 5, 1000);
        let result = cache
            .snapshot(|| Err(TrackerError::NotFound("history".into())))
            .await;
        assert!(result.is_err());
    }
}
