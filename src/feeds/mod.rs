pub mod espn;
pub mod http;
pub mod provider;

pub use espn::EspnResultFeed;
pub use http::{HttpAnalysisProvider, HttpSituationalFeed};
pub use provider::{
    AnalysisProvider, AnalysisRequest, ResultFeed, SignalData, SignalKind, SituationalFeed,
};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::models::{GameContext, RawOpinion};

/// Query every analysis provider concurrently, each under its own timeout.
///
/// A failed or slow provider becomes a single `RawOpinion` carrying `error`,
/// which the aggregator records as a discarded source. Opinions come back in
/// provider order so downstream tie-breaks stay deterministic.
pub async fn gather_opinions(
    providers: &[Arc<dyn AnalysisProvider>],
    request: &AnalysisRequest,
    timeout: Duration,
) -> Vec<RawOpinion> {
    let futures: Vec<_> = providers
        .iter()
        .map(|p| {
            let p = Arc::clone(p);
            async move {
                let res = tokio::time::timeout(timeout, p.analyze(request)).await;
                let out = match res {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {:?}", timeout)),
                };
                (p.name().to_string(), out)
            }
        })
        .collect();

    let results = futures_util::future::join_all(futures).await;

    let mut opinions = Vec::new();
    for (provider_name, result) in results {
        match result {
            Ok(batch) => {
                debug!("Provider '{}' returned {} opinions", provider_name, batch.len());
                opinions.extend(batch.into_iter().map(|mut o| {
                    if o.provider.trim().is_empty() {
                        o.provider = provider_name.clone();
                    }
                    o
                }));
            }
            Err(e) => {
                warn!("Analysis provider '{}' failed: {}", provider_name, e);
                opinions.push(RawOpinion {
                    provider: provider_name,
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        }
    }
    opinions
}

/// Fill the situational bundle from every feed concurrently.
///
/// Fields the caller already supplied are kept. A failed or slow feed is
/// noted in `situation.unavailable` and contributes nothing.
pub async fn assemble_context(
    mut context: GameContext,
    feeds: &[Arc<dyn SituationalFeed>],
    timeout: Duration,
) -> GameContext {
    let snapshot = context.clone();
    let futures: Vec<_> = feeds
        .iter()
        .map(|f| {
            let f = Arc::clone(f);
            let ctx = &snapshot;
            async move {
                let res = tokio::time::timeout(timeout, f.fetch(ctx)).await;
                let out = match res {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {:?}", timeout)),
                };
                (f.kind(), out)
            }
        })
        .collect();

    for (kind, result) in futures_util::future::join_all(futures).await {
        match result {
            Ok(data) => merge_signal(&mut context, data),
            Err(e) => {
                warn!("Situational feed '{}' unavailable: {}", kind, e);
                context.situation.unavailable.push(format!("{}: {}", kind, e));
            }
        }
    }
    context
}

fn merge_signal(ctx: &mut GameContext, data: SignalData) {
    let situation = &mut ctx.situation;
    match data {
        SignalData::Injuries(s) => {
            situation.home.injuries = situation.home.injuries.take().or(Some(s.home));
            situation.away.injuries = situation.away.injuries.take().or(Some(s.away));
        }
        SignalData::Weather(s) => {
            if situation.outdoor.is_none() {
                situation.outdoor = s.outdoor;
            }
            if situation.weather.is_none() {
                situation.weather = s.weather;
            }
        }
        SignalData::Lineups(s) => {
            situation.home.starter = situation.home.starter.take().or(s.home);
            situation.away.starter = situation.away.starter.take().or(s.away);
        }
        SignalData::News(s) => {
            situation.home.news_sentiment = situation.home.news_sentiment.or(s.home);
            situation.away.news_sentiment = situation.away.news_sentiment.or(s.away);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Impact, InjuryReport, InjuryStatus};
    use crate::engine::baseline::compute_baseline;
    use crate::feeds::provider::{InjurySignal, NewsSignal};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct Fixed(&'static str, Vec<RawOpinion>);

    #[async_trait]
    impl AnalysisProvider for Fixed {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<RawOpinion>> {
            Ok(self.1.clone())
        }
        fn name(&self) -> &str {
            self.0
        }
    }

    struct Failing;

    #[async_trait]
    impl AnalysisProvider for Failing {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<RawOpinion>> {
            anyhow::bail!("HTTP 503")
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    struct Slow;

    #[async_trait]
    impl AnalysisProvider for Slow {
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<RawOpinion>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
        fn name(&self) -> &str {
            "slow"
        }
    }

    struct Feed(SignalKind, Option<SignalData>);

    #[async_trait]
    impl SituationalFeed for Feed {
        fn kind(&self) -> SignalKind {
            self.0
        }
        async fn fetch(&self, _context: &GameContext) -> Result<SignalData> {
            self.1.clone().ok_or_else(|| anyhow::anyhow!("feed down"))
        }
    }

    fn ctx() -> GameContext {
        GameContext {
            event_id: "e1".to_string(),
            sport: "NFL".to_string(),
            home_team: "Green Bay Packers".to_string(),
            away_team: "Chicago Bears".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2026, 12, 6, 18, 0, 0).unwrap(),
            venue: None,
            home_moneyline: None,
            away_moneyline: None,
            home_rating: None,
            away_rating: None,
            situation: Default::default(),
        }
    }

    fn opinion(side: &str) -> RawOpinion {
        RawOpinion {
            predicted_side: Some(side.to_string()),
            confidence: Some(0.7),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn gathers_in_provider_order_and_marks_failures() {
        let c = ctx();
        let request = AnalysisRequest {
            baseline: compute_baseline(&c),
            context: c,
        };
        let providers: Vec<Arc<dyn AnalysisProvider>> = vec![
            Arc::new(Fixed("alpha", vec![opinion("Packers")])),
            Arc::new(Failing),
            Arc::new(Fixed("beta", vec![opinion("Bears"), opinion("home")])),
        ];
        let out = gather_opinions(&providers, &request, Duration::from_secs(5)).await;
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].provider, "alpha");
        assert_eq!(out[1].provider, "failing");
        assert!(out[1].error.as_deref().unwrap().contains("503"));
        assert_eq!(out[2].provider, "beta");
        assert_eq!(out[3].provider, "beta");
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let c = ctx();
        let request = AnalysisRequest {
            baseline: compute_baseline(&c),
            context: c,
        };
        let providers: Vec<Arc<dyn AnalysisProvider>> =
            vec![Arc::new(Slow), Arc::new(Fixed("alpha", vec![opinion("home")]))];
        let out = gather_opinions(&providers, &request, Duration::from_millis(50)).await;
        assert_eq!(out.len(), 2);
        assert!(out[0].error.as_deref().unwrap().contains("timed out"));
        assert!(out[1].error.is_none());
    }

    #[tokio::test]
    async fn assembles_context_and_records_unavailable_feeds() {
        let injuries = SignalData::Injuries(InjurySignal {
            home: vec![InjuryReport {
                player: "QB1".to_string(),
                status: InjuryStatus::Out,
                impact: Impact::High,
            }],
            away: vec![],
        });
        let feeds: Vec<Arc<dyn SituationalFeed>> = vec![
            Arc::new(Feed(SignalKind::Injuries, Some(injuries))),
            Arc::new(Feed(SignalKind::Weather, None)),
            Arc::new(Feed(
                SignalKind::News,
                Some(SignalData::News(NewsSignal {
                    home: Some(0.5),
                    away: None,
                })),
            )),
        ];
        let mut c = ctx();
        c.situation.home.news_sentiment = Some(-0.2);
        let out = assemble_context(c, &feeds, Duration::from_secs(5)).await;
        assert_eq!(out.situation.home.injuries.as_ref().unwrap().len(), 1);
        assert_eq!(out.situation.away.injuries.as_ref().unwrap().len(), 0);
        // Caller-supplied values win
        assert_eq!(out.situation.home.news_sentiment, Some(-0.2));
        assert_eq!(out.situation.unavailable.len(), 1);
        assert!(out.situation.unavailable[0].starts_with("weather"));
    }
}
