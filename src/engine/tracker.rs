//! Outcome tracking: matching realized results to tracked picks.
//!
//! A tracked prediction moves PENDING → WIN | LOSS | PUSH | NO_RESULT exactly
//! once. Every WIN/LOSS is fed back into the reliability curve and both teams'
//! ratings are updated from the final score.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::models::{
    CalibrationSample, FinalResult, Pick, PredictionStatus, Resolution, ResultLookup, Side,
    TrackedPrediction,
};
use crate::db::Database;
use crate::engine::curve_cache::CurveCache;
use crate::engine::ratings::RatingBook;
use crate::feeds::ResultFeed;

// ── Team-name matching ───────────────────────────────────────────────────────

/// Lowercase, punctuation to spaces, collapsed whitespace.
pub fn normalize_team_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether two team names refer to the same team.
///
/// Equal after normalization, one contained in the other on word boundaries
/// ("Chiefs" in "Kansas City Chiefs"), or the same nickname of at least four
/// characters ("LA Lakers" / "Los Angeles Lakers").
pub fn names_match(a: &str, b: &str) -> bool {
    let a = normalize_team_name(a);
    let b = normalize_team_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }

    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if short.len() >= 3 && format!(" {long} ").contains(&format!(" {short} ")) {
        return true;
    }

    match (a.split(' ').next_back(), b.split(' ').next_back()) {
        (Some(x), Some(y)) => x.len() >= 4 && x == y,
        _ => false,
    }
}

// ── Classification ───────────────────────────────────────────────────────────

/// Judge a pick against a final result.
///
/// Level score → PUSH. Otherwise the winner is matched against the picked
/// team and the other team; a winner matching neither (or both) cannot be
/// attributed and yields NO_RESULT, as does a tracked abstention.
pub fn classify(pick: &Pick, home_team: &str, away_team: &str, result: &FinalResult) -> Resolution {
    let resolution = |status| Resolution {
        status,
        home_score: Some(result.home_score),
        away_score: Some(result.away_score),
        winner: result.winner.clone(),
    };

    if result.home_score == result.away_score {
        return resolution(PredictionStatus::Push);
    }

    let Pick::Team { side, .. } = pick else {
        return resolution(PredictionStatus::NoResult);
    };

    let winner = match &result.winner {
        Some(w) => w.clone(),
        None if result.home_score > result.away_score => result.home_team.clone(),
        None => result.away_team.clone(),
    };

    let (picked, other) = match side {
        Side::Home => (home_team, away_team),
        Side::Away => (away_team, home_team),
    };

    let status = match (names_match(&winner, picked), names_match(&winner, other)) {
        (true, false) => PredictionStatus::Win,
        (false, true) => PredictionStatus::Loss,
        _ => PredictionStatus::NoResult,
    };

    Resolution {
        winner: Some(winner),
        ..resolution(status)
    }
}

// ── Reconciliation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub resolved: usize,
    pub wins: usize,
    pub losses: usize,
    pub pushes: usize,
    pub no_results: usize,
    /// Checked but not yet final, not found, or the feed failed
    pub unresolved: usize,
    /// PENDING records scheduled before the lookback window
    pub stale: usize,
}

/// One reconciliation pass over PENDING predictions scheduled within the last
/// `lookback_days`. Unresolved records stay PENDING for the next pass.
///
/// Result-feed failures only leave the record unresolved; storage failures
/// abort the pass.
pub async fn reconcile(
    db: &Database,
    feed: &dyn ResultFeed,
    cache: &CurveCache,
    lookback_days: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let window_start = now - Duration::days(lookback_days.max(0));

    for prediction in db.list_pending()? {
        if prediction.scheduled_at > now {
            continue;
        }
        if prediction.scheduled_at < window_start {
            summary.stale += 1;
            warn!(
                "Prediction {} ({} vs {}) unresolved beyond {} day lookback, left PENDING",
                prediction.tracking_id, prediction.home_team, prediction.away_team, lookback_days
            );
            continue;
        }

        summary.checked += 1;
        let lookup = feed
            .fetch_result(
                prediction.sport,
                &prediction.home_team,
                &prediction.away_team,
                prediction.scheduled_at.date_naive(),
            )
            .await;

        let result = match lookup {
            Ok(ResultLookup::Final(result)) => result,
            Ok(ResultLookup::NotFinal) => {
                debug!("{} not final yet", prediction.event_id);
                summary.unresolved += 1;
                continue;
            }
            Ok(ResultLookup::NotFound) => {
                warn!(
                    "No result for {} ({} vs {}) from {}",
                    prediction.event_id,
                    prediction.home_team,
                    prediction.away_team,
                    feed.name()
                );
                summary.unresolved += 1;
                continue;
            }
            Err(e) => {
                warn!("Result feed '{}' failed for {}: {}", feed.name(), prediction.event_id, e);
                summary.unresolved += 1;
                continue;
            }
        };

        let resolution = classify(
            &prediction.pick,
            &prediction.home_team,
            &prediction.away_team,
            &result,
        );
        if !db.resolve_tracked(&prediction.tracking_id, &resolution, now)? {
            debug!("{} already resolved", prediction.tracking_id);
            continue;
        }

        summary.resolved += 1;
        match resolution.status {
            PredictionStatus::Win => summary.wins += 1,
            PredictionStatus::Loss => summary.losses += 1,
            PredictionStatus::Push => summary.pushes += 1,
            PredictionStatus::NoResult => summary.no_results += 1,
            PredictionStatus::Pending => {}
        }
        info!(
            "Resolved {} {}: {} ({}-{})",
            prediction.tracking_id,
            prediction.pick.label(),
            resolution.status,
            result.home_score,
            result.away_score
        );

        feed_back(db, cache, &prediction, &resolution, &result).await?;
    }

    info!(
        "Reconciliation: checked={} resolved={} W={} L={} P={} NR={} unresolved={} stale={}",
        summary.checked,
        summary.resolved,
        summary.wins,
        summary.losses,
        summary.pushes,
        summary.no_results,
        summary.unresolved,
        summary.stale
    );
    Ok(summary)
}

/// Close the loop: calibration sample for decided picks, rating update once
/// per event. The once-per-event marker lives in storage, so picks on the same
/// event resolved in different passes still move the ratings only once.
async fn feed_back(
    db: &Database,
    cache: &CurveCache,
    prediction: &TrackedPrediction,
    resolution: &Resolution,
    result: &FinalResult,
) -> anyhow::Result<()> {
    let was_correct = match resolution.status {
        PredictionStatus::Win => Some(true),
        PredictionStatus::Loss => Some(false),
        _ => None,
    };
    if let (Some(was_correct), Some(_)) = (was_correct, prediction.pick.side()) {
        cache
            .ingest(CalibrationSample {
                confidence: prediction.raw_confidence,
                was_correct,
            })
            .await;
    }

    if db.is_event_rated(prediction.sport, &prediction.event_id)? {
        debug!("{} {} already rated", prediction.sport, prediction.event_id);
        return Ok(());
    }
    let mut book = RatingBook::from_ratings(prediction.sport, db.load_ratings(prediction.sport)?);
    let (home, away) = book.record_result(
        &prediction.home_team,
        &prediction.away_team,
        result.home_score,
        result.away_score,
    );
    let updated = [home, away];
    if db.rate_event(prediction.sport, &prediction.event_id, &updated)? {
        let [home, away] = &updated;
        debug!(
            "Ratings {}: {} {:.1}, {} {:.1}",
            prediction.sport, home.team, home.rating, away.team, away.rating
        );
    }
    Ok(())
}
