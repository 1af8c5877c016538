use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TrackerError;

// ── Sports ───────────────────────────────────────────────────────────────────

/// Competitions with a dedicated baseline profile. Anything else is `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sport {
    Nfl,
    Nba,
    Wnba,
    Mlb,
    Nhl,
    Ncaaf,
    Ncaab,
    Generic,
}

impl Sport {
    /// Map a free-form sport code onto a known profile.
    pub fn from_code(code: &str) -> Sport {
        match code.trim().to_lowercase().as_str() {
            "nfl" | "american_football" => Sport::Nfl,
            "nba" | "basketball" => Sport::Nba,
            "wnba" => Sport::Wnba,
            "mlb" | "baseball" => Sport::Mlb,
            "nhl" | "ice_hockey" | "hockey" => Sport::Nhl,
            "ncaaf" | "college_football" | "college-football" => Sport::Ncaaf,
            "ncaab" | "college_basketball" | "mens-college-basketball" => Sport::Ncaab,
            _ => Sport::Generic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sport::Nfl => "NFL",
            Sport::Nba => "NBA",
            Sport::Wnba => "WNBA",
            Sport::Mlb => "MLB",
            Sport::Nhl => "NHL",
            Sport::Ncaaf => "NCAAF",
            Sport::Ncaab => "NCAAB",
            Sport::Generic => "GENERIC",
        }
    }

    pub fn is_college(self) -> bool {
        matches!(self, Sport::Ncaaf | Sport::Ncaab)
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the matchup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

// ── Game context ─────────────────────────────────────────────────────────────

/// Immutable per-event facts handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameContext {
    /// External event/game ID
    pub event_id: String,
    /// Free-form sport code, e.g. "NFL" or "basketball"
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub venue: Option<String>,
    /// American moneyline odds for the home side, e.g. -150
    #[serde(default)]
    pub home_moneyline: Option<i32>,
    #[serde(default)]
    pub away_moneyline: Option<i32>,
    /// Filled from the rating book when absent
    #[serde(default)]
    pub home_rating: Option<f64>,
    #[serde(default)]
    pub away_rating: Option<f64>,
    #[serde(default)]
    pub situation: Situation,
}

impl GameContext {
    pub fn sport_kind(&self) -> Sport {
        Sport::from_code(&self.sport)
    }

    pub fn team(&self, side: Side) -> &str {
        match side {
            Side::Home => &self.home_team,
            Side::Away => &self.away_team,
        }
    }

    pub fn moneyline(&self, side: Side) -> Option<i32> {
        match side {
            Side::Home => self.home_moneyline,
            Side::Away => self.away_moneyline,
        }
    }
}

/// Situational bundle. Every field is optional: a missing signal simply
/// contributes no adjustment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Situation {
    #[serde(default)]
    pub home: TeamSituation,
    #[serde(default)]
    pub away: TeamSituation,
    /// Distance the away side travelled to the venue
    #[serde(default)]
    pub travel_distance_miles: Option<f64>,
    #[serde(default)]
    pub outdoor: Option<bool>,
    #[serde(default)]
    pub weather: Option<WeatherSummary>,
    /// Venue altitude in feet
    #[serde(default)]
    pub altitude_ft: Option<f64>,
    /// Ballpark run factor, 1.0 = neutral
    #[serde(default)]
    pub park_factor: Option<f64>,
    /// Signals whose feed failed or timed out, e.g. "injuries: timed out"
    #[serde(default)]
    pub unavailable: Vec<String>,
}

impl Situation {
    pub fn team(&self, side: Side) -> &TeamSituation {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamSituation {
    #[serde(default)]
    pub rest_days: Option<u32>,
    /// `None` = injury feed unavailable, `Some(vec![])` = clean report
    #[serde(default)]
    pub injuries: Option<Vec<InjuryReport>>,
    /// Probable pitcher (MLB) or goalie (NHL)
    #[serde(default)]
    pub starter: Option<StarterSummary>,
    /// Possessions per 48 minutes
    #[serde(default)]
    pub pace: Option<f64>,
    #[serde(default)]
    pub bullpen_era: Option<f64>,
    #[serde(default)]
    pub special_teams: Option<SpecialTeams>,
    /// Recent-news sentiment in [-1, 1]
    #[serde(default)]
    pub news_sentiment: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryReport {
    pub player: String,
    pub status: InjuryStatus,
    pub impact: Impact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjuryStatus {
    Out,
    Doubtful,
    Questionable,
    Probable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub condition: WeatherCondition,
    #[serde(default)]
    pub temperature_f: Option<f64>,
    #[serde(default)]
    pub wind_mph: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Favorable,
    HighWind,
    HeavyRain,
    Freezing,
    ExtremeHeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarterSummary {
    pub name: String,
    #[serde(default)]
    pub era: Option<f64>,
    #[serde(default)]
    pub save_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecialTeams {
    pub power_play_pct: f64,
    pub penalty_kill_pct: f64,
}

// ── Baseline ─────────────────────────────────────────────────────────────────

/// A named situational adjustment, signed in home-win probability points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub name: String,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineResult {
    pub sport: Sport,
    /// Final clamped home-win probability
    pub home_win_probability: f64,
    /// Elo probability before situational adjustments
    pub base_probability: f64,
    pub home_rating: f64,
    pub away_rating: f64,
    /// Effective rating difference fed to the logistic, home advantage included
    pub rating_difference: f64,
    /// Applied adjustments, in application order
    pub adjustments: Vec<Adjustment>,
    pub model_confidence: f64,
}

impl BaselineResult {
    pub fn side_probability(&self, side: Side) -> f64 {
        match side {
            Side::Home => self.home_win_probability,
            Side::Away => 1.0 - self.home_win_probability,
        }
    }
}

// ── Opinions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(s: &str) -> Option<RiskLevel> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" | "MODERATE" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// An opinion exactly as a provider returned it. Field aliases cover the
/// shapes the upstream analysis services emit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOpinion {
    #[serde(default)]
    pub provider: String,
    #[serde(default, alias = "predicted_winner", alias = "prediction", alias = "pick")]
    pub predicted_side: Option<String>,
    #[serde(default, alias = "confidence_score")]
    pub confidence: Option<f64>,
    #[serde(default, alias = "key_factors", alias = "critical_factors")]
    pub factors: Vec<String>,
    #[serde(default, alias = "risk")]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A validated opinion resolved to one side of the matchup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOpinion {
    pub provider: String,
    pub side: Side,
    pub team: String,
    pub confidence: f64,
    pub factors: Vec<String>,
    pub risk: RiskLevel,
    /// Whether the baseline gives this side at least a modest edge
    pub baseline_favoured: bool,
}

// ── Consensus ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Pick {
    Team { side: Side, team: String },
    NoPick,
}

impl Pick {
    pub fn side(&self) -> Option<Side> {
        match self {
            Pick::Team { side, .. } => Some(*side),
            Pick::NoPick => None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Pick::Team { team, .. } => team,
            Pick::NoPick => "NO_PICK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
    StrongConsensus,
    Disagreement,
    SingleSource,
    NoConsensus,
}

impl AgreementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgreementStatus::StrongConsensus => "STRONG_CONSENSUS",
            AgreementStatus::Disagreement => "DISAGREEMENT",
            AgreementStatus::SingleSource => "SINGLE_SOURCE",
            AgreementStatus::NoConsensus => "NO_CONSENSUS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

/// Consensus-level strength of the pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusTier {
    Skip,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConsensusTier {
    pub fn action(self) -> &'static str {
        match self {
            ConsensusTier::VeryHigh => "STRONG_BET",
            ConsensusTier::High => "MODERATE_BET",
            ConsensusTier::Medium => "SMALL_BET",
            ConsensusTier::Low => "LEAN",
            ConsensusTier::Skip => "SKIP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub pick: Pick,
    pub confidence: f64,
    pub agreement: AgreementStatus,
    /// Composite advantage signal in [0, 1]
    pub edge_score: f64,
    pub success_probability: f64,
    pub value_rating: ValueRating,
    pub risk_level: RiskLevel,
    pub tier: ConsensusTier,
    /// Bankroll fraction, only when a moneyline for the pick is known
    pub kelly_fraction: Option<f64>,
    pub expected_value: Option<f64>,
    /// Number of valid opinions that went into the decision
    pub opinion_count: usize,
    pub reasoning: Vec<String>,
}

// ── Calibration ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationTier {
    NoPlay,
    LeanPlay,
    ModeratePlay,
    StrongPlay,
    PremiumPlay,
}

impl RecommendationTier {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationTier::PremiumPlay => "PREMIUM_PLAY",
            RecommendationTier::StrongPlay => "STRONG_PLAY",
            RecommendationTier::ModeratePlay => "MODERATE_PLAY",
            RecommendationTier::LeanPlay => "LEAN_PLAY",
            RecommendationTier::NoPlay => "NO_PLAY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedRecommendation {
    pub sport: Sport,
    pub raw_confidence: f64,
    pub calibrated_confidence: f64,
    pub reliability_score: f64,
    /// max(0, raw - calibrated)
    pub overconfidence_penalty: f64,
    pub shrinkage_applied: f64,
    pub sport_adjustment: f64,
    pub tier: RecommendationTier,
    pub kelly_fraction: Option<f64>,
}

/// Terminal artifact of the pipeline for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub context: GameContext,
    pub baseline: BaselineResult,
    pub consensus: ConsensusResult,
    pub calibrated: CalibratedRecommendation,
    pub generated_at: DateTime<Utc>,
}

/// One historical (confidence, outcome) pair feeding the reliability curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSample {
    pub confidence: f64,
    pub was_correct: bool,
}

// ── Tracking ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionStatus {
    Pending,
    Win,
    Loss,
    Push,
    NoResult,
}

impl PredictionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Pending => "PENDING",
            PredictionStatus::Win => "WIN",
            PredictionStatus::Loss => "LOSS",
            PredictionStatus::Push => "PUSH",
            PredictionStatus::NoResult => "NO_RESULT",
        }
    }
}

impl FromStr for PredictionStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(PredictionStatus::Pending),
            "WIN" => Ok(PredictionStatus::Win),
            "LOSS" => Ok(PredictionStatus::Loss),
            "PUSH" => Ok(PredictionStatus::Push),
            "NO_RESULT" => Ok(PredictionStatus::NoResult),
            other => Err(TrackerError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted recommendation awaiting (or holding) its realized outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPrediction {
    pub tracking_id: String,
    pub event_id: String,
    pub sport: Sport,
    pub home_team: String,
    pub away_team: String,
    pub scheduled_at: DateTime<Utc>,
    pub pick: Pick,
    pub raw_confidence: f64,
    pub calibrated_confidence: f64,
    pub status: PredictionStatus,
    pub context: GameContext,
    pub consensus: ConsensusResult,
    pub calibrated: CalibratedRecommendation,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub winner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Terminal status plus the final score that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub status: PredictionStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub winner: Option<String>,
}

// ── Performance ──────────────────────────────────────────────────────────────

/// The slice of a tracked pick the performance summary needs.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub sport: Sport,
    pub status: PredictionStatus,
    pub raw_confidence: f64,
    pub strong_consensus: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Win/loss tally. `win_rate` is over WIN, LOSS and PUSH; NO_RESULT is
/// counted but never decided.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutcomeTally {
    pub wins: u64,
    pub losses: u64,
    pub pushes: u64,
    pub no_results: u64,
    pub win_rate: Option<f64>,
}

/// Stated vs realized accuracy for one confidence band of decided picks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceBand {
    pub label: &'static str,
    pub count: u64,
    pub mean_confidence: f64,
    pub accuracy: f64,
    pub calibration_error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

/// Win rate of picks resolved in the last few days against the whole window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentTrend {
    pub days: i64,
    pub picks: u64,
    pub wins: u64,
    pub win_rate: f64,
    pub direction: TrendDirection,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub window_days: i64,
    pub total_predictions: u64,
    pub pending: u64,
    pub overall: OutcomeTally,
    /// Picks stated at 0.75 or above
    pub high_confidence: OutcomeTally,
    pub strong_consensus: OutcomeTally,
    pub by_sport: BTreeMap<String, OutcomeTally>,
    pub by_confidence: Vec<ConfidenceBand>,
    /// Mean calibration error over the populated bands
    pub calibration_error: Option<f64>,
    pub recent_trend: Option<RecentTrend>,
}

// ── Results ──────────────────────────────────────────────────────────────────

/// A completed event as reported by the result feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub home_team: String,
    pub away_team: String,
    pub home_score: i32,
    pub away_score: i32,
    /// `None` when the event finished level or was abandoned
    pub winner: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultLookup {
    Final(FinalResult),
    NotFinal,
    NotFound,
}

/// Persisted Elo-style strength estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRating {
    pub sport: Sport,
    /// Normalized team name used as the lookup key
    pub key: String,
    pub team: String,
    pub rating: f64,
    pub games: u32,
}
