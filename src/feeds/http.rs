use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::provider::{
    AnalysisProvider, AnalysisRequest, InjurySignal, LineupSignal, NewsSignal, SignalData,
    SignalKind, SituationalFeed, WeatherSignal,
};
use crate::db::models::{GameContext, RawOpinion};

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

// ── Analysis provider ────────────────────────────────────────────────────────

/// Analysis service reached over HTTP: the request is POSTed as JSON and the
/// reply is a list of opinions, `{"opinions": [...]}`, a single opinion
/// object, or `{"error": "..."}`.
pub struct HttpAnalysisProvider {
    http: Client,
    name: String,
    url: String,
}

impl HttpAnalysisProvider {
    pub fn new(name: &str, url: &str, timeout: Duration) -> Result<Self> {
        Ok(HttpAnalysisProvider {
            http: build_client(timeout)?,
            name: name.to_string(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisProvider for HttpAnalysisProvider {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawOpinion>> {
        debug!("Requesting analysis from {} ({})", self.name, self.url);
        let resp = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.name))?;

        if !resp.status().is_success() {
            anyhow::bail!("{} error: {}", self.name, resp.status());
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.name))?;

        parse_analysis_response(&raw)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn parse_analysis_response(raw: &serde_json::Value) -> Result<Vec<RawOpinion>> {
    let items = match raw {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("opinions").and_then(|v| v.as_array()) {
            Some(items) => items.as_slice(),
            None => std::slice::from_ref(raw),
        },
        other => anyhow::bail!("unexpected analysis response: {}", other),
    };

    // A malformed entry becomes an error marker so its siblings still count.
    Ok(items
        .iter()
        .map(|item| {
            serde_json::from_value::<RawOpinion>(item.clone()).unwrap_or_else(|e| RawOpinion {
                provider: item
                    .get("provider")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                error: Some(format!("malformed opinion: {}", e)),
                ..Default::default()
            })
        })
        .collect())
}

// ── Situational feeds ────────────────────────────────────────────────────────

/// Situational data source reached over HTTP. The game context is POSTed as
/// JSON; the reply shape depends on the feed kind.
pub struct HttpSituationalFeed {
    http: Client,
    kind: SignalKind,
    url: String,
}

impl HttpSituationalFeed {
    pub fn new(kind: SignalKind, url: &str, timeout: Duration) -> Result<Self> {
        Ok(HttpSituationalFeed {
            http: build_client(timeout)?,
            kind,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SituationalFeed for HttpSituationalFeed {
    fn kind(&self) -> SignalKind {
        self.kind
    }

    async fn fetch(&self, context: &GameContext) -> Result<SignalData> {
        debug!("Fetching {} for {}", self.kind, context.event_id);
        let resp = self
            .http
            .post(&self.url)
            .json(context)
            .send()
            .await
            .with_context(|| format!("{} feed request failed", self.kind))?;

        if !resp.status().is_success() {
            anyhow::bail!("{} feed error: {}", self.kind, resp.status());
        }

        let raw: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse {} feed response", self.kind))?;

        parse_signal(self.kind, raw)
    }
}

pub fn parse_signal(kind: SignalKind, raw: serde_json::Value) -> Result<SignalData> {
    if let Some(err) = raw.get("error").filter(|e| !e.is_null()) {
        anyhow::bail!("{} feed reported error: {}", kind, err);
    }
    let data = match kind {
        SignalKind::Injuries => SignalData::Injuries(
            serde_json::from_value::<InjurySignal>(raw).context("malformed injury report")?,
        ),
        SignalKind::Weather => SignalData::Weather(
            serde_json::from_value::<WeatherSignal>(raw).context("malformed weather report")?,
        ),
        SignalKind::Lineups => SignalData::Lineups(
            serde_json::from_value::<LineupSignal>(raw).context("malformed lineup report")?,
        ),
        SignalKind::News => SignalData::News(
            serde_json::from_value::<NewsSignal>(raw).context("malformed news report")?,
        ),
    };
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{InjuryStatus, WeatherCondition};
    use serde_json::json;

    #[test]
    fn parses_array_and_aliased_fields() {
        let raw = json!([
            {"provider": "alpha", "predicted_winner": "Chiefs", "confidence_score": 78,
             "key_factors": ["Rest", "Home crowd"], "risk": "LOW"},
            {"provider": "beta", "pick": "away", "confidence": 0.61}
        ]);
        let ops = parse_analysis_response(&raw).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].predicted_side.as_deref(), Some("Chiefs"));
        assert_eq!(ops[0].confidence, Some(78.0));
        assert_eq!(ops[0].factors.len(), 2);
        assert_eq!(ops[0].risk_level.as_deref(), Some("LOW"));
        assert_eq!(ops[1].predicted_side.as_deref(), Some("away"));
    }

    #[test]
    fn parses_wrapped_single_and_error_shapes() {
        let wrapped = json!({"opinions": [{"prediction": "home", "confidence": 0.7}]});
        assert_eq!(parse_analysis_response(&wrapped).unwrap().len(), 1);

        let single = json!({"prediction": "home", "confidence": 0.7});
        assert_eq!(parse_analysis_response(&single).unwrap().len(), 1);

        let error = json!({"error": "quota exceeded"});
        let ops = parse_analysis_response(&error).unwrap();
        assert_eq!(ops[0].error.as_deref(), Some("quota exceeded"));

        assert!(parse_analysis_response(&json!("nope")).is_err());
    }

    #[test]
    fn malformed_entry_does_not_drop_its_siblings() {
        let raw = json!([
            {"prediction": "home", "confidence": 0.7},
            {"provider": "beta", "prediction": "away", "confidence": "high"}
        ]);
        let ops = parse_analysis_response(&raw).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].predicted_side.as_deref(), Some("home"));
        assert!(ops[0].error.is_none());
        assert_eq!(ops[1].provider, "beta");
        assert!(ops[1].error.as_deref().unwrap().starts_with("malformed opinion"));
        assert!(ops[1].predicted_side.is_none());
    }

    #[test]
    fn parses_signals_by_kind() {
        let injuries = parse_signal(
            SignalKind::Injuries,
            json!({"home": [{"player": "QB1", "status": "out", "impact": "high"}]}),
        )
        .unwrap();
        match injuries {
            SignalData::Injuries(s) => {
                assert_eq!(s.home[0].status, InjuryStatus::Out);
                assert!(s.away.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let weather = parse_signal(
            SignalKind::Weather,
            json!({"outdoor": true, "weather": {"condition": "high_wind", "wind_mph": 28.0}}),
        )
        .unwrap();
        match weather {
            SignalData::Weather(s) => {
                assert_eq!(s.weather.unwrap().condition, WeatherCondition::HighWind);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn signal_error_marker_is_an_error() {
        assert!(parse_signal(SignalKind::News, json!({"error": "upstream down"})).is_err());
        assert!(parse_signal(SignalKind::News, json!({"home": 0.4, "error": null})).is_ok());
    }
}
