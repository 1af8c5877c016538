use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::PredictionEngine;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Run a reconciliation pass every `interval`.
///
/// A failed pass (storage unavailable) is retried with exponential backoff
/// and jitter until it succeeds; the regular cadence resumes afterwards.
pub fn start_reconcile_loop(engine: PredictionEngine, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Reconciliation loop started (interval={:?}, lookback={}d)",
            interval,
            engine.settings().lookback_days
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let mut backoff = INITIAL_BACKOFF;
            loop {
                match engine.reconcile_outcomes(None).await {
                    Ok(summary) => {
                        if summary.resolved > 0 {
                            info!(
                                "Scheduled reconciliation resolved {} prediction(s)",
                                summary.resolved
                            );
                        }
                        break;
                    }
                    Err(e) => {
                        let wait = with_jitter(backoff, &mut rand::thread_rng());
                        warn!("Reconciliation failed: {:#}. Retrying in {:?}", e, wait);
                        tokio::time::sleep(wait).await;
                        backoff = next_backoff(backoff);
                    }
                }
            }
        }
    })
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Adds up to half of `base` again, so retrying callers spread out.
fn with_jitter<R: Rng>(base: Duration, rng: &mut R) -> Duration {
    let max_extra = base.as_millis() as u64 / 2;
    if max_extra == 0 {
        return base;
    }
    base + Duration::from_millis(rng.gen_range(0..=max_extra))
}
