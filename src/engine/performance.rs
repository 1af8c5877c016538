//! Windowed win-rate report over tracked picks: totals, per-sport breakdown,
//! stated vs realized accuracy by confidence band, and the recent trend.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::db::models::{
    ConfidenceBand, OutcomeRecord, OutcomeTally, PerformanceSummary, PredictionStatus,
    RecentTrend, TrendDirection,
};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const TREND_DAYS: i64 = 7;
/// Recent win rate must differ from the window's by more than this to count
/// as a trend.
const TREND_THRESHOLD: f64 = 0.05;
const HIGH_CONFIDENCE: f64 = 0.75;
const MEDIUM_CONFIDENCE: f64 = 0.60;

impl OutcomeTally {
    fn record(&mut self, status: PredictionStatus) {
        match status {
            PredictionStatus::Win => self.wins += 1,
            PredictionStatus::Loss => self.losses += 1,
            PredictionStatus::Push => self.pushes += 1,
            PredictionStatus::NoResult => self.no_results += 1,
            PredictionStatus::Pending => {}
        }
    }

    fn completed(&self) -> u64 {
        self.wins + self.losses + self.pushes
    }

    fn finish(mut self) -> Self {
        let completed = self.completed();
        self.win_rate = (completed > 0).then(|| self.wins as f64 / completed as f64);
        self
    }
}

/// Summarize `records`, all created within the last `window_days`.
pub fn summarize(
    records: &[OutcomeRecord],
    window_days: i64,
    now: DateTime<Utc>,
) -> PerformanceSummary {
    let mut overall = OutcomeTally::default();
    let mut high_confidence = OutcomeTally::default();
    let mut strong_consensus = OutcomeTally::default();
    let mut by_sport: BTreeMap<String, OutcomeTally> = BTreeMap::new();
    let mut pending = 0;

    for r in records {
        if r.status == PredictionStatus::Pending {
            pending += 1;
            continue;
        }
        overall.record(r.status);
        if r.raw_confidence >= HIGH_CONFIDENCE {
            high_confidence.record(r.status);
        }
        if r.strong_consensus {
            strong_consensus.record(r.status);
        }
        by_sport
            .entry(r.sport.as_str().to_string())
            .or_default()
            .record(r.status);
    }

    let overall = overall.finish();
    let by_confidence = confidence_bands(records);
    let calibration_error = (!by_confidence.is_empty()).then(|| {
        by_confidence.iter().map(|b| b.calibration_error).sum::<f64>() / by_confidence.len() as f64
    });
    let recent_trend = overall
        .win_rate
        .and_then(|window_rate| recent_trend(records, window_rate, now));

    PerformanceSummary {
        window_days,
        total_predictions: records.len() as u64,
        pending,
        overall,
        high_confidence: high_confidence.finish(),
        strong_consensus: strong_consensus.finish(),
        by_sport: by_sport.into_iter().map(|(k, t)| (k, t.finish())).collect(),
        by_confidence,
        calibration_error,
        recent_trend,
    }
}

/// WIN/LOSS picks grouped into high (≥ 0.75), medium (≥ 0.60) and low bands.
/// Empty bands are left out.
fn confidence_bands(records: &[OutcomeRecord]) -> Vec<ConfidenceBand> {
    let mut sums = [(0u64, 0.0f64, 0u64); 3];
    for r in records {
        let correct = match r.status {
            PredictionStatus::Win => 1,
            PredictionStatus::Loss => 0,
            _ => continue,
        };
        let idx = if r.raw_confidence >= HIGH_CONFIDENCE {
            0
        } else if r.raw_confidence >= MEDIUM_CONFIDENCE {
            1
        } else {
            2
        };
        sums[idx].0 += 1;
        sums[idx].1 += r.raw_confidence;
        sums[idx].2 += correct;
    }

    ["high", "medium", "low"]
        .into_iter()
        .zip(sums)
        .filter(|(_, (count, _, _))| *count > 0)
        .map(|(label, (count, confidence_sum, wins))| {
            let mean_confidence = confidence_sum / count as f64;
            let accuracy = wins as f64 / count as f64;
            ConfidenceBand {
                label,
                count,
                mean_confidence,
                accuracy,
                calibration_error: (mean_confidence - accuracy).abs(),
            }
        })
        .collect()
}

fn recent_trend(
    records: &[OutcomeRecord],
    window_rate: f64,
    now: DateTime<Utc>,
) -> Option<RecentTrend> {
    let since = now - Duration::days(TREND_DAYS);
    let mut recent = OutcomeTally::default();
    for r in records {
        if r.resolved_at.is_some_and(|at| at >= since) {
            recent.record(r.status);
        }
    }
    let recent = recent.finish();
    let win_rate = recent.win_rate?;

    let direction = if win_rate > window_rate + TREND_THRESHOLD {
        TrendDirection::Improving
    } else if win_rate < window_rate - TREND_THRESHOLD {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    };
    Some(RecentTrend {
        days: TREND_DAYS,
        picks: recent.completed(),
        wins: recent.wins,
        win_rate,
        direction,
        magnitude: (win_rate - window_rate).abs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Sport;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn record(sport: Sport, status: PredictionStatus, confidence: f64, days_ago: i64) -> OutcomeRecord {
        OutcomeRecord {
            sport,
            status,
            raw_confidence: confidence,
            strong_consensus: confidence >= 0.7,
            resolved_at: (status != PredictionStatus::Pending).then(|| now() - Duration::days(days_ago)),
        }
    }

    #[test]
    fn empty_window_has_no_rates() {
        let s = summarize(&[], 30, now());
        assert_eq!(s.total_predictions, 0);
        assert!(s.overall.win_rate.is_none());
        assert!(s.by_sport.is_empty());
        assert!(s.by_confidence.is_empty());
        assert!(s.calibration_error.is_none());
        assert!(s.recent_trend.is_none());
    }

    #[test]
    fn tallies_per_sport_and_band() {
        use PredictionStatus::*;
        let records = [
            record(Sport::Nfl, Win, 0.80, 20),
            record(Sport::Nfl, Loss, 0.78, 18),
            record(Sport::Nfl, Push, 0.62, 15),
            record(Sport::Nba, Win, 0.65, 12),
            record(Sport::Nba, NoResult, 0.55, 11),
            record(Sport::Nba, Pending, 0.70, 0),
        ];
        let s = summarize(&records, 30, now());

        assert_eq!(s.total_predictions, 6);
        assert_eq!(s.pending, 1);
        assert_eq!(s.overall.wins, 2);
        assert_eq!(s.overall.no_results, 1);
        // Pushes are completed, NO_RESULT is not
        assert_relative_eq!(s.overall.win_rate.unwrap(), 0.5);

        let nfl = &s.by_sport["NFL"];
        assert_eq!((nfl.wins, nfl.losses, nfl.pushes), (1, 1, 1));
        assert_relative_eq!(s.by_sport["NBA"].win_rate.unwrap(), 1.0);

        assert_eq!(s.high_confidence.wins + s.high_confidence.losses, 2);
        assert_eq!(s.strong_consensus.wins, 1);

        // Pushes carry no accuracy signal, so only WIN/LOSS land in bands
        assert_eq!(s.by_confidence.len(), 2);
        let high = &s.by_confidence[0];
        assert_eq!(high.label, "high");
        assert_eq!(high.count, 2);
        assert_relative_eq!(high.mean_confidence, 0.79, epsilon = 1e-12);
        assert_relative_eq!(high.calibration_error, 0.29, epsilon = 1e-12);
        let medium = &s.by_confidence[1];
        assert_relative_eq!(medium.calibration_error, 0.35, epsilon = 1e-12);
        assert_relative_eq!(s.calibration_error.unwrap(), 0.32, epsilon = 1e-12);
    }

    #[test]
    fn recent_losses_read_as_declining() {
        use PredictionStatus::*;
        let mut records = vec![
            record(Sport::Nhl, Win, 0.7, 20),
            record(Sport::Nhl, Win, 0.7, 19),
            record(Sport::Nhl, Win, 0.7, 18),
        ];
        records.push(record(Sport::Nhl, Loss, 0.7, 2));
        records.push(record(Sport::Nhl, Win, 0.7, 1));

        let trend = summarize(&records, 30, now()).recent_trend.unwrap();
        assert_eq!(trend.picks, 2);
        assert_eq!(trend.wins, 1);
        assert_relative_eq!(trend.win_rate, 0.5);
        assert_eq!(trend.direction, TrendDirection::Declining);
        assert_relative_eq!(trend.magnitude, 0.3, epsilon = 1e-12);

        records.push(record(Sport::Nhl, Win, 0.7, 0));
        let trend = summarize(&records, 30, now()).recent_trend.unwrap();
        // 2/3 recent vs 5/6 overall
        assert_eq!(trend.direction, TrendDirection::Declining);

        let quiet = summarize(&records[..3], 30, now());
        assert!(quiet.recent_trend.is_none());
    }
}
