use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::db::models::{
    BaselineResult, GameContext, PerformanceSummary, PredictionStatus, RawOpinion, Recommendation,
    TrackedPrediction,
};
use crate::db::Database;
use crate::error::TrackerResult;
use crate::feeds::{
    assemble_context, gather_opinions, AnalysisProvider, AnalysisRequest, ResultFeed,
    SituationalFeed,
};

use super::aggregator::aggregate;
use super::baseline::compute_baseline;
use super::calibration::{abstain, calibrate, CalibrationStats, ReliabilityCurve};
use super::consensus::{build_consensus, StakeSettings};
use super::curve_cache::CurveCache;
use super::kelly::moneyline_to_price;
use super::performance::summarize;
use super::ratings::RatingBook;
use super::tracker::{reconcile, ReconcileSummary};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Per-fetch timeout for providers and situational feeds
    pub fetch_timeout: Duration,
    pub stake: StakeSettings,
    /// Most recent resolved outcomes used to build the reliability curve
    pub history_limit: i64,
    pub lookback_days: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            fetch_timeout: Duration::from_secs(8),
            stake: StakeSettings::default(),
            history_limit: 1000,
            lookback_days: 7,
        }
    }
}

/// Baseline, consensus and calibration for one event, plus the tracking
/// loop that feeds realized outcomes back into calibration and ratings.
#[derive(Clone)]
pub struct PredictionEngine {
    db: Database,
    providers: Vec<Arc<dyn AnalysisProvider>>,
    feeds: Vec<Arc<dyn SituationalFeed>>,
    result_feed: Arc<dyn ResultFeed>,
    cache: CurveCache,
    settings: EngineSettings,
}

impl PredictionEngine {
    pub fn new(
        db: Database,
        providers: Vec<Arc<dyn AnalysisProvider>>,
        feeds: Vec<Arc<dyn SituationalFeed>>,
        result_feed: Arc<dyn ResultFeed>,
        cache: CurveCache,
        settings: EngineSettings,
    ) -> Self {
        PredictionEngine {
            db,
            providers,
            feeds,
            result_feed,
            cache,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ── Recommendation ───────────────────────────────────────────────────────

    /// Full pipeline for one event: situational fan-out, baseline, analysis
    /// fan-out, consensus, calibration.
    ///
    /// Provider and feed failures only degrade the output. Errors are
    /// storage failures while reading ratings or calibration history.
    pub async fn compute_recommendation(&self, context: GameContext) -> Result<Recommendation> {
        let timeout = self.settings.fetch_timeout;
        let mut context = assemble_context(context, &self.feeds, timeout).await;
        self.fill_ratings(&mut context)?;

        let baseline = compute_baseline(&context);
        let request = AnalysisRequest {
            context: context.clone(),
            baseline: baseline.clone(),
        };
        let raw = gather_opinions(&self.providers, &request, timeout).await;

        let curve = self.curve().await?;
        let rec = recommend(context, baseline, &raw, &curve, self.settings.stake, Utc::now());

        info!(
            "{} {} @ {}: {} raw={:.3} calibrated={:.3} {} ({})",
            rec.context.sport,
            rec.context.away_team,
            rec.context.home_team,
            rec.consensus.pick.label(),
            rec.calibrated.raw_confidence,
            rec.calibrated.calibrated_confidence,
            rec.calibrated.tier.as_str(),
            rec.consensus.agreement.as_str()
        );
        Ok(rec)
    }

    /// Ratings the caller did not supply come from the persisted book.
    fn fill_ratings(&self, context: &mut GameContext) -> TrackerResult<()> {
        if context.home_rating.is_some() && context.away_rating.is_some() {
            return Ok(());
        }
        let sport = context.sport_kind();
        let book = RatingBook::from_ratings(sport, self.db.load_ratings(sport)?);
        if context.home_rating.is_none() {
            context.home_rating = book.rating(&context.home_team);
        }
        if context.away_rating.is_none() {
            context.away_rating = book.rating(&context.away_team);
        }
        debug!(
            "Ratings for {}: home={:?} away={:?} ({} teams on book)",
            context.event_id,
            context.home_rating,
            context.away_rating,
            book.len()
        );
        Ok(())
    }

    async fn curve(&self) -> Result<Arc<ReliabilityCurve>> {
        let db = &self.db;
        let limit = self.settings.history_limit;
        self.cache
            .snapshot(|| db.calibration_samples(limit))
            .await
            .context("Failed to load calibration history")
    }

    // ── Tracking ─────────────────────────────────────────────────────────────

    /// Persist a PENDING record for a recommendation. Returns the tracking id.
    pub fn track_recommendation(&self, rec: &Recommendation) -> Result<String> {
        let now = Utc::now();
        let tracking_id = format!(
            "{}-{}-{:06x}",
            rec.context.event_id,
            now.timestamp_millis(),
            rand::random::<u32>() & 0xff_ffff
        );
        let prediction = TrackedPrediction {
            tracking_id: tracking_id.clone(),
            event_id: rec.context.event_id.clone(),
            sport: rec.context.sport_kind(),
            home_team: rec.context.home_team.clone(),
            away_team: rec.context.away_team.clone(),
            scheduled_at: rec.context.scheduled_at,
            pick: rec.consensus.pick.clone(),
            raw_confidence: rec.consensus.confidence,
            calibrated_confidence: rec.calibrated.calibrated_confidence,
            status: PredictionStatus::Pending,
            context: rec.context.clone(),
            consensus: rec.consensus.clone(),
            calibrated: rec.calibrated.clone(),
            home_score: None,
            away_score: None,
            winner: None,
            created_at: now,
            resolved_at: None,
        };
        self.db
            .insert_tracked(&prediction)
            .context("Failed to persist tracked prediction")?;
        info!(
            "Tracking {}: {} ({})",
            tracking_id,
            prediction.pick.label(),
            rec.calibrated.tier.as_str()
        );
        Ok(tracking_id)
    }

    /// One reconciliation pass. `None` uses the configured lookback.
    pub async fn reconcile_outcomes(&self, lookback_days: Option<i64>) -> Result<ReconcileSummary> {
        let lookback = lookback_days.unwrap_or(self.settings.lookback_days);
        reconcile(
            &self.db,
            self.result_feed.as_ref(),
            &self.cache,
            lookback,
            Utc::now(),
        )
        .await
    }

    // ── Introspection ────────────────────────────────────────────────────────

    pub async fn calibration_stats(&self) -> Result<CalibrationStats> {
        Ok(self.curve().await?.stats())
    }

    pub fn status_counts(&self) -> Result<HashMap<String, i64>> {
        Ok(self.db.status_counts()?)
    }

    /// Win rates over predictions created in the last `days` days.
    pub fn performance_summary(&self, days: i64) -> Result<PerformanceSummary> {
        let days = days.max(1);
        let now = Utc::now();
        let records = self
            .db
            .outcome_records(now - chrono::Duration::days(days))
            .context("Failed to load tracked outcomes")?;
        Ok(summarize(&records, days, now))
    }

    pub fn list_predictions(
        &self,
        status: Option<PredictionStatus>,
        limit: i64,
    ) -> TrackerResult<Vec<TrackedPrediction>> {
        self.db.list_tracked(status, limit)
    }

    pub fn get_prediction(&self, tracking_id: &str) -> TrackerResult<TrackedPrediction> {
        self.db.get_tracked(tracking_id)
    }
}

/// The synchronous part of the pipeline: aggregation, consensus and
/// calibration over already-gathered inputs. Never fails.
pub fn recommend(
    context: GameContext,
    baseline: BaselineResult,
    raw: &[RawOpinion],
    curve: &ReliabilityCurve,
    stake: StakeSettings,
    now: DateTime<Utc>,
) -> Recommendation {
    let aggregation = aggregate(raw, &context, &baseline);
    let mut consensus = build_consensus(&baseline, &aggregation.opinions, &context, stake);

    for d in &aggregation.discarded {
        consensus
            .reasoning
            .push(format!("Excluded {}: {}", d.provider, d.reason));
    }
    if !context.situation.unavailable.is_empty() {
        consensus.reasoning.push(format!(
            "Situational data unavailable: {}",
            context.situation.unavailable.join("; ")
        ));
    }

    let sport = context.sport_kind();
    let calibrated = match consensus.pick.side() {
        Some(side) => calibrate(consensus.confidence, sport, curve).with_stake(
            context.moneyline(side).and_then(moneyline_to_price),
            stake.kelly_multiplier,
            stake.kelly_cap,
        ),
        None => abstain(sport),
    };

    Recommendation {
        context,
        baseline,
        consensus,
        calibrated,
        generated_at: now,
    }
}
