//! Incrementally updated Elo ratings per sport.
//!
//! Every team enters at the league mean. Each completed game moves the two
//! ratings by equal and opposite amounts, so the mean over all rated teams
//! stays exactly at [`RATING_MEAN`]. The move is clipped so neither team
//! leaves the sport's variance band.

use std::collections::HashMap;

use crate::db::models::{Sport, TeamRating};
use crate::engine::baseline::{elo_probability, profile, RATING_MEAN};
use crate::engine::tracker::normalize_team_name;

/// Elo K-factor: maximum rating points exchanged in one game.
pub const K_FACTOR: f64 = 32.0;

#[derive(Debug, Clone)]
pub struct RatingBook {
    sport: Sport,
    ratings: HashMap<String, TeamRating>,
}

impl RatingBook {
    pub fn from_ratings(sport: Sport, ratings: Vec<TeamRating>) -> Self {
        let ratings = ratings
            .into_iter()
            .filter(|r| r.sport == sport)
            .map(|r| (r.key.clone(), r))
            .collect();
        RatingBook { sport, ratings }
    }

    /// Rating of a team that has played at least one tracked game.
    pub fn rating(&self, team: &str) -> Option<f64> {
        self.ratings.get(&normalize_team_name(team)).map(|r| r.rating)
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    fn entry(&mut self, team: &str) -> &mut TeamRating {
        let key = normalize_team_name(team);
        let sport = self.sport;
        self.ratings.entry(key.clone()).or_insert_with(|| TeamRating {
            sport,
            key,
            team: team.to_string(),
            rating: RATING_MEAN,
            games: 0,
        })
    }

    /// Apply one final score. Returns the two updated ratings (home, away)
    /// for persistence.
    pub fn record_result(
        &mut self,
        home_team: &str,
        away_team: &str,
        home_score: i32,
        away_score: i32,
    ) -> (TeamRating, TeamRating) {
        let prof = profile(self.sport);
        let (lo, hi) = prof.rating_band();

        let home = self.entry(home_team).rating;
        let away = self.entry(away_team).rating;

        let expected = elo_probability(home - away + prof.home_advantage);
        let actual = match home_score.cmp(&away_score) {
            std::cmp::Ordering::Greater => 1.0,
            std::cmp::Ordering::Less => 0.0,
            std::cmp::Ordering::Equal => 0.5,
        };

        // Both ratings start inside the band, so this interval always holds 0.
        let min_delta = (lo - home).max(away - hi);
        let max_delta = (hi - home).min(away - lo);
        let delta = (K_FACTOR * (actual - expected)).clamp(min_delta, max_delta);

        let home_entry = self.entry(home_team);
        home_entry.rating = home + delta;
        home_entry.games += 1;
        let home_entry = home_entry.clone();

        let away_entry = self.entry(away_team);
        away_entry.rating = away - delta;
        away_entry.games += 1;
        let away_entry = away_entry.clone();

        (home_entry, away_entry)
    }
}
