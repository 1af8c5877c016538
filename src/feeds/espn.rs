use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::provider::ResultFeed;
use crate::db::models::{FinalResult, ResultLookup, Sport};
use crate::engine::tracker::names_match;

pub const DEFAULT_ESPN_URL: &str = "https://site.api.espn.com/apis/site/v2/sports";

/// Final scores from the ESPN public scoreboard API.
pub struct EspnResultFeed {
    http: Client,
    /// Base URL for overriding in tests
    base_url: String,
}

impl EspnResultFeed {
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(EspnResultFeed {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_ESPN_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn scoreboard_url(&self, sport: Sport, date: NaiveDate) -> Result<Option<Url>> {
        let Some(path) = sport_path(sport) else {
            return Ok(None);
        };
        let url = Url::parse_with_params(
            &format!("{}/{}/scoreboard", self.base_url, path),
            &[("dates", date.format("%Y%m%d").to_string())],
        )
        .context("Invalid ESPN scoreboard URL")?;
        Ok(Some(url))
    }

    async fn scoreboard(&self, url: Url) -> Result<serde_json::Value> {
        debug!("Fetching ESPN scoreboard {}", url);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("ESPN request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("ESPN error: {}", resp.status());
        }
        resp.json().await.context("Failed to parse ESPN response")
    }
}

fn sport_path(sport: Sport) -> Option<&'static str> {
    match sport {
        Sport::Nfl => Some("football/nfl"),
        Sport::Nba => Some("basketball/nba"),
        Sport::Wnba => Some("basketball/wnba"),
        Sport::Mlb => Some("baseball/mlb"),
        Sport::Nhl => Some("hockey/nhl"),
        Sport::Ncaaf => Some("football/college-football"),
        Sport::Ncaab => Some("basketball/mens-college-basketball"),
        Sport::Generic => None,
    }
}

#[async_trait]
impl ResultFeed for EspnResultFeed {
    async fn fetch_result(
        &self,
        sport: Sport,
        home_team: &str,
        away_team: &str,
        date: NaiveDate,
    ) -> Result<ResultLookup> {
        // Scoreboards are keyed by US local date; late kick-offs fall on the
        // previous day relative to UTC.
        let dates = [Some(date), date.checked_sub_days(Days::new(1))];
        for day in dates.into_iter().flatten() {
            let Some(url) = self.scoreboard_url(sport, day)? else {
                return Ok(ResultLookup::NotFound);
            };
            let raw = self.scoreboard(url).await?;
            match parse_scoreboard(&raw, home_team, away_team) {
                ResultLookup::NotFound => continue,
                found => return Ok(found),
            }
        }
        Ok(ResultLookup::NotFound)
    }

    fn name(&self) -> &str {
        "ESPN"
    }
}

struct Competitor {
    names: Vec<String>,
    display: String,
    score: Option<i32>,
    winner: bool,
}

fn competitor(raw: &serde_json::Value) -> Competitor {
    let team = &raw["team"];
    let names = ["displayName", "shortDisplayName", "name"]
        .iter()
        .filter_map(|k| team[*k].as_str())
        .map(str::to_string)
        .collect();
    let score = raw["score"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| raw["score"].as_i64().map(|v| v as i32));
    Competitor {
        names,
        display: team["displayName"].as_str().unwrap_or("Unknown").to_string(),
        score,
        winner: raw["winner"].as_bool().unwrap_or(false),
    }
}

fn is_team(c: &Competitor, team: &str) -> bool {
    c.names.iter().any(|n| names_match(n, team))
}

/// Find the matchup on a scoreboard. Scores are oriented to the caller's
/// home/away even when the venue listing is reversed.
pub fn parse_scoreboard(raw: &serde_json::Value, home_team: &str, away_team: &str) -> ResultLookup {
    let Some(events) = raw["events"].as_array() else {
        return ResultLookup::NotFound;
    };

    for event in events {
        let comp = &event["competitions"][0];
        let Some(competitors) = comp["competitors"].as_array() else {
            continue;
        };
        if competitors.len() != 2 {
            continue;
        }
        let (first, second) = (competitor(&competitors[0]), competitor(&competitors[1]));
        let first_is_home = competitors[0]["homeAway"].as_str() == Some("home");
        let (espn_home, espn_away) = if first_is_home {
            (first, second)
        } else {
            (second, first)
        };

        let (ours_home, ours_away) = if is_team(&espn_home, home_team) && is_team(&espn_away, away_team) {
            (espn_home, espn_away)
        } else if is_team(&espn_home, away_team) && is_team(&espn_away, home_team) {
            (espn_away, espn_home)
        } else {
            continue;
        };

        let status = &event["status"]["type"];
        let final_ = status["completed"].as_bool().unwrap_or(false)
            || status["name"].as_str() == Some("STATUS_FINAL")
            || status["state"].as_str() == Some("post");
        if !final_ {
            return ResultLookup::NotFinal;
        }

        let (Some(home_score), Some(away_score)) = (ours_home.score, ours_away.score) else {
            return ResultLookup::NotFinal;
        };
        let winner = if ours_home.winner {
            Some(ours_home.display.clone())
        } else if ours_away.winner {
            Some(ours_away.display.clone())
        } else if home_score > away_score {
            Some(ours_home.display.clone())
        } else if away_score > home_score {
            Some(ours_away.display.clone())
        } else {
            None
        };

        return ResultLookup::Final(FinalResult {
            home_team: ours_home.display,
            away_team: ours_away.display,
            home_score,
            away_score,
            winner,
            source: "ESPN".to_string(),
        });
    }
    ResultLookup::NotFound
}
