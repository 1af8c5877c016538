use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::models::{
    BaselineResult, GameContext, InjuryReport, RawOpinion, ResultLookup, Sport, StarterSummary,
    WeatherSummary,
};

/// Payload handed to every analysis provider.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub context: GameContext,
    pub baseline: BaselineResult,
}

/// An independent qualitative analysis service.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Zero or more opinions for the matchup. Entries carrying `error` are
    /// treated as "no opinion" downstream.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawOpinion>>;

    /// Human-readable name for logging and provenance.
    fn name(&self) -> &str;
}

// ── Situational signals ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Injuries,
    Weather,
    Lineups,
    News,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::Injuries => "injuries",
            SignalKind::Weather => "weather",
            SignalKind::Lineups => "lineups",
            SignalKind::News => "news",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "injuries" => Ok(SignalKind::Injuries),
            "weather" => Ok(SignalKind::Weather),
            "lineups" => Ok(SignalKind::Lineups),
            "news" => Ok(SignalKind::News),
            other => anyhow::bail!("unknown situational feed kind '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjurySignal {
    #[serde(default)]
    pub home: Vec<InjuryReport>,
    #[serde(default)]
    pub away: Vec<InjuryReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherSignal {
    #[serde(default)]
    pub outdoor: Option<bool>,
    #[serde(default)]
    pub weather: Option<WeatherSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineupSignal {
    #[serde(default)]
    pub home: Option<StarterSummary>,
    #[serde(default)]
    pub away: Option<StarterSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsSignal {
    #[serde(default)]
    pub home: Option<f64>,
    #[serde(default)]
    pub away: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalData {
    Injuries(InjurySignal),
    Weather(WeatherSignal),
    Lineups(LineupSignal),
    News(NewsSignal),
}

/// One situational data source (injuries, weather, lineups or news).
#[async_trait]
pub trait SituationalFeed: Send + Sync {
    fn kind(&self) -> SignalKind;

    async fn fetch(&self, context: &GameContext) -> Result<SignalData>;
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Source of final scores for completed events.
#[async_trait]
pub trait ResultFeed: Send + Sync {
    async fn fetch_result(
        &self,
        sport: Sport,
        home_team: &str,
        away_team: &str,
        date: NaiveDate,
    ) -> Result<ResultLookup>;

    fn name(&self) -> &str;
}
