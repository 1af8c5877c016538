//! Reliability-curve calibration of consensus confidence.
//!
//! Historical (stated confidence, was correct) pairs are bucketed into ten
//! bins covering [0.5, 1.0]. A bin's calibrated value is its empirical hit
//! rate; bins below the sample threshold are skipped, the remaining bins are
//! pooled until their hit rates are non-decreasing, and the curve is linearly
//! interpolated between the bin centers, flat beyond them.
use serde::Serialize;

use crate::db::models::{CalibratedRecommendation, CalibrationSample, RecommendationTier, Sport};
use crate::engine::baseline::profile;
use crate::engine::kelly::capped_stake;

pub const BIN_COUNT: usize = 10;
const BIN_LOWER: f64 = 0.5;
const BIN_WIDTH: f64 = 0.05;

/// Historical overall hit rate that shrinkage pulls toward.
const SHRINK_TARGET: f64 = 0.65;
/// Confidence at or above which a pick counts as "high confidence" in stats.
const HIGH_CONFIDENCE: f64 = 0.85;
const MIN_FINAL: f64 = 0.10;
const MAX_FINAL: f64 = 0.99;
/// Resolution of the monotone envelope.
const GRID_STEPS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Bin {
    count: u64,
    hits: u64,
    confidence_sum: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityCurve {
    bins: [Bin; BIN_COUNT],
    min_bin_samples: u64,
    total: u64,
    hits: u64,
    brier_sum: f64,
    high_count: u64,
    high_hits: u64,
    high_confidence_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinStats {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
    pub accuracy: Option<f64>,
    pub mean_confidence: Option<f64>,
    /// Whether the bin has enough samples to shape the curve
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationStats {
    pub total_samples: u64,
    pub overall_accuracy: Option<f64>,
    pub per_bin: Vec<BinStats>,
    pub high_confidence_samples: u64,
    /// Mean stated confidence minus realized accuracy for picks at ≥ 0.85
    pub overconfidence_gap: Option<f64>,
    pub brier_score: Option<f64>,
    pub curve_points: usize,
}

fn bin_index(confidence: f64) -> Option<usize> {
    if !confidence.is_finite() || confidence < BIN_LOWER || confidence > 1.0 {
        return None;
    }
    let idx = ((confidence - BIN_LOWER) / BIN_WIDTH + 1e-9).floor() as usize;
    Some(idx.min(BIN_COUNT - 1))
}

fn bin_center(idx: usize) -> f64 {
    BIN_LOWER + BIN_WIDTH * (idx as f64 + 0.5)
}

/// Empirical accuracy at `confidence` on the curve `points`. Identity when
/// there are none.
fn interpolate(points: &[(f64, f64)], confidence: f64) -> f64 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return confidence;
    };
    if confidence <= first.0 {
        return first.1;
    }
    if confidence >= last.0 {
        return last.1;
    }
    for pair in points.windows(2) {
        let (x1, y1) = pair[0];
        let (x2, y2) = pair[1];
        if confidence <= x2 {
            let w = (confidence - x1) / (x2 - x1);
            return y1 + w * (y2 - y1);
        }
    }
    last.1
}

impl ReliabilityCurve {
    pub fn new(min_bin_samples: u64) -> Self {
        ReliabilityCurve {
            bins: [Bin::default(); BIN_COUNT],
            min_bin_samples: min_bin_samples.max(1),
            total: 0,
            hits: 0,
            brier_sum: 0.0,
            high_count: 0,
            high_hits: 0,
            high_confidence_sum: 0.0,
        }
    }

    pub fn from_samples(samples: &[CalibrationSample], min_bin_samples: u64) -> Self {
        let mut curve = ReliabilityCurve::new(min_bin_samples);
        for sample in samples {
            curve.record(*sample);
        }
        curve
    }

    /// Fold one resolved pick into the curve.
    pub fn record(&mut self, sample: CalibrationSample) {
        if !sample.confidence.is_finite() {
            return;
        }
        let confidence = sample.confidence.clamp(0.0, 1.0);
        let outcome = if sample.was_correct { 1.0 } else { 0.0 };

        self.total += 1;
        self.hits += sample.was_correct as u64;
        self.brier_sum += (confidence - outcome).powi(2);

        if confidence >= HIGH_CONFIDENCE {
            self.high_count += 1;
            self.high_hits += sample.was_correct as u64;
            self.high_confidence_sum += confidence;
        }

        if let Some(idx) = bin_index(confidence) {
            let bin = &mut self.bins[idx];
            bin.count += 1;
            bin.hits += sample.was_correct as u64;
            bin.confidence_sum += confidence;
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.total
    }

    /// (bin center, hit rate) for every bin with enough samples, with
    /// adjacent violators pooled by sample count so the rates never decrease.
    pub fn points(&self) -> Vec<(f64, f64)> {
        // (hits, count, number of bins merged into the block)
        let mut blocks: Vec<(u64, u64, usize)> = Vec::new();
        let mut centers = Vec::new();
        for (i, bin) in self.bins.iter().enumerate() {
            if bin.count < self.min_bin_samples {
                continue;
            }
            centers.push(bin_center(i));
            blocks.push((bin.hits, bin.count, 1));
            while blocks.len() >= 2 {
                let (h2, c2, n2) = blocks[blocks.len() - 1];
                let (h1, c1, n1) = blocks[blocks.len() - 2];
                // h1/c1 > h2/c2 without dividing
                if h1 * c2 <= h2 * c1 {
                    break;
                }
                blocks.pop();
                if let Some(last) = blocks.last_mut() {
                    *last = (h1 + h2, c1 + c2, n1 + n2);
                }
            }
        }

        let rates = blocks
            .iter()
            .flat_map(|&(hits, count, n)| std::iter::repeat(hits as f64 / count as f64).take(n));
        centers.into_iter().zip(rates).collect()
    }

    pub fn stats(&self) -> CalibrationStats {
        let ratio = |num: f64, den: u64| (den > 0).then(|| num / den as f64);

        let per_bin = self
            .bins
            .iter()
            .enumerate()
            .map(|(i, b)| BinStats {
                lower: BIN_LOWER + BIN_WIDTH * i as f64,
                upper: BIN_LOWER + BIN_WIDTH * (i + 1) as f64,
                count: b.count,
                accuracy: ratio(b.hits as f64, b.count),
                mean_confidence: ratio(b.confidence_sum, b.count),
                active: b.count >= self.min_bin_samples,
            })
            .collect();

        let overconfidence_gap = match (
            ratio(self.high_confidence_sum, self.high_count),
            ratio(self.high_hits as f64, self.high_count),
        ) {
            (Some(predicted), Some(realized)) => Some(predicted - realized),
            _ => None,
        };

        CalibrationStats {
            total_samples: self.total,
            overall_accuracy: ratio(self.hits as f64, self.total),
            per_bin,
            high_confidence_samples: self.high_count,
            overconfidence_gap,
            brier_score: ratio(self.brier_sum, self.total),
            curve_points: self.points().len(),
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

/// Shrinkage grows with stated confidence: 5% up to 0.75, rising linearly to
/// 25% at 0.95 and above.
pub fn shrinkage_factor(raw: f64) -> f64 {
    (0.05 + (raw - 0.75)).clamp(0.05, 0.25)
}

/// Curve lookup, sport multiplier, shrinkage toward the historical hit rate,
/// then the floor at `raw` for picks that were already conservative, then
/// clamp. Shrinkage grows with `raw`, so this alone can still dip.
fn pointwise(raw: f64, multiplier: f64, points: &[(f64, f64)]) -> f64 {
    let calibrated = interpolate(points, raw) * multiplier;
    let shrinkage = shrinkage_factor(raw);
    let shrunk = calibrated * (1.0 - shrinkage) + SHRINK_TARGET * shrinkage;
    let value = if raw < calibrated { shrunk.max(raw) } else { shrunk };
    value.clamp(MIN_FINAL, MAX_FINAL)
}

/// Upper monotone envelope of `pointwise`: the running maximum from the left
/// on a fixed grid, linearly interpolated. Never below the pointwise value at
/// a grid point, so the floor at `raw` survives.
fn monotone(raw: f64, multiplier: f64, curve: &ReliabilityCurve) -> f64 {
    let points = curve.points();
    let mut envelope = vec![0.0; GRID_STEPS + 1];
    let mut running = f64::NEG_INFINITY;
    for (i, slot) in envelope.iter_mut().enumerate() {
        let x = i as f64 / GRID_STEPS as f64;
        running = running.max(pointwise(x, multiplier, &points));
        *slot = running;
    }

    let pos = raw * GRID_STEPS as f64;
    let lo = (pos.floor() as usize).min(GRID_STEPS);
    let hi = (lo + 1).min(GRID_STEPS);
    let w = (pos - lo as f64).clamp(0.0, 1.0);
    envelope[lo] + w * (envelope[hi] - envelope[lo])
}

/// Calibrate a raw consensus confidence for `sport` against `curve`.
/// Pure: the same confidence, sport and curve always give the same output.
pub fn calibrate(raw: f64, sport: Sport, curve: &ReliabilityCurve) -> CalibratedRecommendation {
    let raw = if raw.is_finite() { raw.clamp(0.0, 1.0) } else { 0.0 };
    let sport_adjustment = profile(sport).reliability;

    let calibrated = monotone(raw, sport_adjustment, curve);
    let reliability_score = (1.0 - 2.0 * (calibrated - raw).abs()).clamp(0.1, 1.0);

    CalibratedRecommendation {
        sport,
        raw_confidence: raw,
        calibrated_confidence: calibrated,
        reliability_score,
        overconfidence_penalty: (raw - calibrated).max(0.0),
        shrinkage_applied: shrinkage_factor(raw),
        sport_adjustment,
        tier: recommendation_tier(calibrated, reliability_score),
        kelly_fraction: None,
    }
}

/// Output for an abstention: nothing to calibrate, nothing to stake.
pub fn abstain(sport: Sport) -> CalibratedRecommendation {
    CalibratedRecommendation {
        sport,
        raw_confidence: 0.0,
        calibrated_confidence: 0.0,
        reliability_score: 0.1,
        overconfidence_penalty: 0.0,
        shrinkage_applied: 0.0,
        sport_adjustment: profile(sport).reliability,
        tier: RecommendationTier::NoPlay,
        kelly_fraction: None,
    }
}

pub fn recommendation_tier(confidence: f64, reliability: f64) -> RecommendationTier {
    let composite = confidence * 0.7 + reliability * 0.3;
    if composite >= 0.90 {
        RecommendationTier::PremiumPlay
    } else if composite >= 0.82 {
        RecommendationTier::StrongPlay
    } else if composite >= 0.75 {
        RecommendationTier::ModeratePlay
    } else if composite >= 0.65 {
        RecommendationTier::LeanPlay
    } else {
        RecommendationTier::NoPlay
    }
}

impl CalibratedRecommendation {
    /// Attach a Kelly stake sized on the calibrated confidence. NO_PLAY tiers
    /// and unknown prices get no stake.
    pub fn with_stake(mut self, market_price: Option<f64>, multiplier: f64, cap: f64) -> Self {
        self.kelly_fraction = match market_price {
            Some(price) if self.tier != RecommendationTier::NoPlay => {
                Some(capped_stake(self.calibrated_confidence, price, multiplier, cap))
            }
            _ => None,
        };
        self
    }
}
