//! Pre-game baseline win probability.
//!
//! The rating difference (home − away) plus the sport's home-advantage
//! constant goes through the Elo logistic:
//!
//!   p = 1 / (1 + 10^(−Δ/400))
//!
//! and a sport-specific, ordered list of bounded situational adjustments is
//! then added in probability space. The sum is clamped to the sport's band:
//! no matchup is ever priced as a near-certainty.
//!
//! Which situational factors matter depends on the sport:
//! - **NFL / NCAAF**: rest, weather, injuries, travel
//! - **NBA / WNBA / NCAAB**: back-to-back fatigue, rest, pace matchup, altitude
//! - **MLB**: starting pitcher folded into the rating gap, ballpark, bullpen
//! - **NHL**: goalie, special teams, rest, travel

use crate::db::models::{
    Adjustment, BaselineResult, GameContext, Impact, InjuryReport, InjuryStatus, Side, Sport,
    WeatherCondition,
};

/// League-wide rating mean. Ratings are centered here.
pub const RATING_MEAN: f64 = 1500.0;

/// Adjustments smaller than this are treated as noise and dropped.
const NOISE_FLOOR: f64 = 0.005;

// ── Sport profiles ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SportProfile {
    /// Home advantage in rating points
    pub home_advantage: f64,
    /// Relative half-width of the rating band around the mean
    pub rating_variance: f64,
    pub min_probability: f64,
    pub max_probability: f64,
    /// Inherent predictability applied by the calibrator
    pub reliability: f64,
    /// Scales the baseline's model confidence
    pub confidence_multiplier: f64,
}

impl SportProfile {
    /// Lowest and highest rating a team may hold in this sport.
    pub fn rating_band(&self) -> (f64, f64) {
        (
            RATING_MEAN * (1.0 - self.rating_variance),
            RATING_MEAN * (1.0 + self.rating_variance),
        )
    }
}

pub fn profile(sport: Sport) -> SportProfile {
    let (home_advantage, rating_variance, reliability, confidence_multiplier) = match sport {
        Sport::Nfl => (57.0, 0.15, 0.95, 1.0),
        Sport::Nba => (36.0, 0.12, 1.02, 1.05),
        Sport::Wnba => (40.0, 0.14, 0.98, 1.0),
        Sport::Mlb => (54.0, 0.18, 0.90, 0.9),
        Sport::Nhl => (55.0, 0.16, 0.93, 0.85),
        Sport::Ncaaf => (65.0, 0.20, 0.88, 0.8),
        Sport::Ncaab => (42.0, 0.16, 0.85, 0.9),
        Sport::Generic => (40.0, 0.15, 0.95, 1.0),
    };
    let (min_probability, max_probability) = if sport.is_college() {
        (0.10, 0.90)
    } else {
        (0.15, 0.85)
    };
    SportProfile {
        home_advantage,
        rating_variance,
        min_probability,
        max_probability,
        reliability,
        confidence_multiplier,
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Elo logistic: probability that the side with rating advantage `delta` wins.
pub fn elo_probability(delta: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf(-delta / 400.0))
}

/// Compute the baseline for one matchup. Total: missing inputs fall back to
/// neutral values and lower the model confidence instead of failing.
pub fn compute_baseline(ctx: &GameContext) -> BaselineResult {
    let sport = ctx.sport_kind();
    let prof = profile(sport);

    let mut missing_inputs = ctx.situation.unavailable.len();
    let home_rating = match ctx.home_rating {
        Some(r) if r.is_finite() => r,
        _ => {
            missing_inputs += 1;
            RATING_MEAN
        }
    };
    let away_rating = match ctx.away_rating {
        Some(r) if r.is_finite() => r,
        _ => {
            missing_inputs += 1;
            RATING_MEAN
        }
    };

    let rating_difference = match sport {
        Sport::Mlb => mlb_rating_difference(ctx, home_rating, away_rating) + prof.home_advantage,
        _ => home_rating - away_rating + prof.home_advantage,
    };
    let base_probability = elo_probability(rating_difference);

    let mut adjustments = Adjustments::default();
    match sport {
        Sport::Nfl => football_adjustments(ctx, &mut adjustments),
        Sport::Ncaaf => {
            talent_gap(home_rating - away_rating, &mut adjustments);
            football_adjustments(ctx, &mut adjustments);
        }
        Sport::Nba | Sport::Wnba => basketball_adjustments(ctx, &mut adjustments),
        Sport::Ncaab => {
            talent_gap(home_rating - away_rating, &mut adjustments);
            basketball_adjustments(ctx, &mut adjustments);
        }
        Sport::Mlb => baseball_adjustments(ctx, &mut adjustments),
        Sport::Nhl => hockey_adjustments(ctx, &mut adjustments),
        Sport::Generic => {
            adjustments.push("Injuries", injury_adjustment(ctx));
            adjustments.push("Rest advantage", rest_adjustment(ctx, 2, 0.015, 0.045));
            adjustments.push("News sentiment", news_adjustment(ctx));
        }
    }

    let adjustments = adjustments.0;
    let adjusted = base_probability + adjustments.iter().map(|a| a.magnitude).sum::<f64>();
    let home_win_probability = adjusted.clamp(prof.min_probability, prof.max_probability);

    let model_confidence = model_confidence(
        adjustments.len(),
        home_rating - away_rating,
        missing_inputs,
        prof.confidence_multiplier,
    );

    BaselineResult {
        sport,
        home_win_probability,
        base_probability,
        home_rating,
        away_rating,
        rating_difference,
        adjustments,
        model_confidence,
    }
}

// ── Model confidence ─────────────────────────────────────────────────────────

/// Confidence in the baseline itself, independent of which side it favours.
/// More fired adjustments and a wider rating gap mean more information; every
/// missing core input costs 0.05.
fn model_confidence(
    fired: usize,
    rating_gap: f64,
    missing_inputs: usize,
    multiplier: f64,
) -> f64 {
    let mut confidence = 0.7 + (fired as f64 * 0.05).min(0.2);
    let gap = rating_gap.abs();
    if gap > 100.0 {
        confidence += ((gap - 100.0) / 1000.0).min(0.1);
    }
    confidence *= multiplier;
    confidence -= missing_inputs as f64 * 0.05;
    confidence.clamp(0.4, 0.95)
}

// ── Adjustment list ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Adjustments(Vec<Adjustment>);

impl Adjustments {
    fn push(&mut self, name: &str, magnitude: f64) {
        if magnitude.is_finite() && magnitude.abs() >= NOISE_FLOOR {
            self.0.push(Adjustment {
                name: name.to_string(),
                magnitude,
            });
        }
    }
}

// ── Sport rules ──────────────────────────────────────────────────────────────

fn football_adjustments(ctx: &GameContext, adj: &mut Adjustments) {
    adj.push("Rest advantage", rest_adjustment(ctx, 3, 0.02, 0.06));
    adj.push("Weather", weather_adjustment(ctx));
    adj.push("Injuries", injury_adjustment(ctx));
    adj.push("Travel", travel_adjustment(ctx));
    adj.push("News sentiment", news_adjustment(ctx));
}

fn basketball_adjustments(ctx: &GameContext, adj: &mut Adjustments) {
    adj.push("Back-to-back", back_to_back_adjustment(ctx));
    adj.push("Rest advantage", rest_adjustment(ctx, 2, 0.015, 0.045));
    adj.push("Pace matchup", pace_adjustment(ctx));
    adj.push("Altitude", altitude_adjustment(ctx));
    adj.push("Injuries", injury_adjustment(ctx));
    adj.push("News sentiment", news_adjustment(ctx));
}

fn baseball_adjustments(ctx: &GameContext, adj: &mut Adjustments) {
    adj.push("Ballpark", park_adjustment(ctx));
    adj.push("Bullpen", bullpen_adjustment(ctx));
    adj.push("Injuries", injury_adjustment(ctx));
    adj.push("News sentiment", news_adjustment(ctx));
}

fn hockey_adjustments(ctx: &GameContext, adj: &mut Adjustments) {
    adj.push("Goalie matchup", goalie_adjustment(ctx));
    adj.push("Special teams", special_teams_adjustment(ctx));
    adj.push("Rest advantage", rest_adjustment(ctx, 1, 0.02, 0.05));
    adj.push("Travel", travel_adjustment(ctx));
    adj.push("Injuries", injury_adjustment(ctx));
}

/// College talent gaps are wider than the logistic alone suggests.
fn talent_gap(rating_gap: f64, adj: &mut Adjustments) {
    if rating_gap.abs() > 100.0 {
        let magnitude = (rating_gap.abs() / 200.0).min(0.5) * 0.1;
        adj.push("Talent gap", magnitude.copysign(rating_gap));
    }
}

/// Team strength carries 60% of an MLB matchup; the probable starters carry
/// the rest, at 30 rating points per run of ERA difference.
fn mlb_rating_difference(ctx: &GameContext, home_rating: f64, away_rating: f64) -> f64 {
    let team = (home_rating - away_rating) * 0.6;
    let home_era = ctx.situation.home.starter.as_ref().and_then(|s| s.era);
    let away_era = ctx.situation.away.starter.as_ref().and_then(|s| s.era);
    let pitching = match (home_era, away_era) {
        (Some(h), Some(a)) if h.is_finite() && a.is_finite() => ((a - h) * 30.0).clamp(-60.0, 60.0),
        _ => 0.0,
    };
    team + pitching
}

fn rest_adjustment(ctx: &GameContext, min_gap: i64, per_day: f64, cap: f64) -> f64 {
    let (Some(home), Some(away)) = (ctx.situation.home.rest_days, ctx.situation.away.rest_days)
    else {
        return 0.0;
    };
    let diff = home as i64 - away as i64;
    if diff.abs() < min_gap {
        return 0.0;
    }
    (diff as f64 * per_day).clamp(-cap, cap)
}

fn back_to_back_adjustment(ctx: &GameContext) -> f64 {
    let home_b2b = ctx.situation.home.rest_days == Some(0);
    let away_b2b = ctx.situation.away.rest_days == Some(0);
    match (home_b2b, away_b2b) {
        (true, false) => -0.04,
        (false, true) => 0.04,
        _ => 0.0,
    }
}

fn weather_adjustment(ctx: &GameContext) -> f64 {
    if ctx.situation.outdoor == Some(false) {
        return 0.0;
    }
    match ctx.situation.weather.as_ref().map(|w| w.condition) {
        Some(WeatherCondition::HighWind) => -0.02,
        Some(WeatherCondition::HeavyRain) => -0.01,
        Some(WeatherCondition::Freezing) => 0.01,
        Some(WeatherCondition::ExtremeHeat) => -0.01,
        Some(WeatherCondition::Favorable) | None => 0.0,
    }
}

fn injury_weight(report: &InjuryReport) -> f64 {
    let status = match report.status {
        InjuryStatus::Out => 0.04,
        InjuryStatus::Doubtful => 0.025,
        InjuryStatus::Questionable => 0.015,
        InjuryStatus::Probable => 0.0,
    };
    let impact = match report.impact {
        Impact::High => 1.5,
        Impact::Medium => 1.0,
        Impact::Low => 0.5,
    };
    status * impact
}

/// Net injury burden: positive when the away side is hurt more.
fn injury_adjustment(ctx: &GameContext) -> f64 {
    let burden = |side: Side| -> f64 {
        ctx.situation
            .team(side)
            .injuries
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(injury_weight)
            .sum()
    };
    (burden(Side::Away) - burden(Side::Home)).clamp(-0.15, 0.15)
}

fn travel_adjustment(ctx: &GameContext) -> f64 {
    match ctx.situation.travel_distance_miles {
        Some(miles) if miles > 2500.0 => 0.015,
        Some(miles) if miles > 1500.0 => 0.008,
        _ => 0.0,
    }
}

fn news_adjustment(ctx: &GameContext) -> f64 {
    let home = ctx.situation.home.news_sentiment.unwrap_or(0.0).clamp(-1.0, 1.0);
    let away = ctx.situation.away.news_sentiment.unwrap_or(0.0).clamp(-1.0, 1.0);
    ((home - away) * 0.02).clamp(-0.03, 0.03)
}

fn pace_adjustment(ctx: &GameContext) -> f64 {
    match (ctx.situation.home.pace, ctx.situation.away.pace) {
        (Some(h), Some(a)) => ((h - a) * 0.002).clamp(-0.02, 0.02),
        _ => 0.0,
    }
}

fn altitude_adjustment(ctx: &GameContext) -> f64 {
    match ctx.situation.altitude_ft {
        Some(ft) if ft >= 4000.0 => 0.02,
        _ => 0.0,
    }
}

fn park_adjustment(ctx: &GameContext) -> f64 {
    match ctx.situation.park_factor {
        Some(f) if f >= 1.05 => 0.01,
        Some(f) if f <= 0.95 => -0.01,
        _ => 0.0,
    }
}

fn bullpen_adjustment(ctx: &GameContext) -> f64 {
    match (ctx.situation.home.bullpen_era, ctx.situation.away.bullpen_era) {
        (Some(h), Some(a)) => ((a - h) * 0.01).clamp(-0.03, 0.03),
        _ => 0.0,
    }
}

fn goalie_adjustment(ctx: &GameContext) -> f64 {
    let save_pct = |side: Side| ctx.situation.team(side).starter.as_ref().and_then(|s| s.save_pct);
    match (save_pct(Side::Home), save_pct(Side::Away)) {
        (Some(h), Some(a)) => ((h - a) * 2.0).clamp(-0.05, 0.05),
        _ => 0.0,
    }
}

fn special_teams_adjustment(ctx: &GameContext) -> f64 {
    let home = ctx.situation.home.special_teams;
    let away = ctx.situation.away.special_teams;
    match (home, away) {
        (Some(h), Some(a)) => {
            let diff = (h.power_play_pct + h.penalty_kill_pct) - (a.power_play_pct + a.penalty_kill_pct);
            (diff * 0.002).clamp(-0.03, 0.03)
        }
        _ => 0.0,
    }
}
