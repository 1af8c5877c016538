use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{TrackerError, TrackerResult};

pub mod models;
use models::*;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> TrackerResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> TrackerResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> TrackerResult<Self> {
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> TrackerResult<()> {
        self.conn().execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied statement
        // behind, so a poisoned guard is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Tracked predictions ───────────────────────────────────────────────────

    /// Insert a new tracked prediction
    pub fn insert_tracked(&self, p: &TrackedPrediction) -> TrackerResult<()> {
        let context_json = serde_json::to_string(&p.context)?;
        let consensus_json = serde_json::to_string(&p.consensus)?;
        let calibrated_json = serde_json::to_string(&p.calibrated)?;
        let pick_side = p.pick.side().map(side_str);
        let conn = self.conn();
        conn.execute(
            "INSERT INTO tracked_predictions (
                tracking_id, event_id, sport, home_team, away_team, scheduled_at,
                pick_side, pick_team, raw_confidence, calibrated_confidence,
                agreement, tier, status, context_json, consensus_json,
                calibrated_json, home_score, away_score, winner, created_at, resolved_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
            params![
                p.tracking_id,
                p.event_id,
                p.sport.as_str(),
                p.home_team,
                p.away_team,
                p.scheduled_at,
                pick_side,
                p.pick.label(),
                p.raw_confidence,
                p.calibrated_confidence,
                p.consensus.agreement.as_str(),
                p.calibrated.tier.as_str(),
                p.status.as_str(),
                context_json,
                consensus_json,
                calibrated_json,
                p.home_score,
                p.away_score,
                p.winner,
                p.created_at,
                p.resolved_at,
            ],
        )?;
        Ok(())
    }

    /// Fetch one tracked prediction by id
    pub fn get_tracked(&self, tracking_id: &str) -> TrackerResult<TrackedPrediction> {
        let conn = self.conn();
        let sql = format!("SELECT {TRACKED_COLUMNS} FROM tracked_predictions WHERE tracking_id=?1");
        conn.query_row(&sql, params![tracking_id], map_tracked)
            .optional()?
            .ok_or_else(|| TrackerError::NotFound(tracking_id.to_string()))
    }

    /// List tracked predictions, newest first, optionally filtered by status
    pub fn list_tracked(
        &self,
        status: Option<PredictionStatus>,
        limit: i64,
    ) -> TrackerResult<Vec<TrackedPrediction>> {
        let conn = self.conn();
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {TRACKED_COLUMNS} FROM tracked_predictions
                     WHERE status=?1 ORDER BY created_at DESC LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit], map_tracked)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let sql = format!(
                    "SELECT {TRACKED_COLUMNS} FROM tracked_predictions
                     ORDER BY created_at DESC LIMIT ?1"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit], map_tracked)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// All PENDING predictions, oldest scheduled first
    pub fn list_pending(&self) -> TrackerResult<Vec<TrackedPrediction>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {TRACKED_COLUMNS} FROM tracked_predictions
             WHERE status='PENDING' ORDER BY scheduled_at ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_tracked)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Write the terminal status of a PENDING prediction.
    ///
    /// Returns `false` (and changes nothing) when the record is already
    /// terminal, which makes repeated reconciliation a no-op.
    pub fn resolve_tracked(
        &self,
        tracking_id: &str,
        resolution: &Resolution,
        resolved_at: DateTime<Utc>,
    ) -> TrackerResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE tracked_predictions
             SET status=?1, home_score=?2, away_score=?3, winner=?4, resolved_at=?5
             WHERE tracking_id=?6 AND status='PENDING'",
            params![
                resolution.status.as_str(),
                resolution.home_score,
                resolution.away_score,
                resolution.winner,
                resolved_at,
                tracking_id,
            ],
        )?;
        if changed == 0 {
            let exists: Option<String> = conn
                .query_row(
                    "SELECT status FROM tracked_predictions WHERE tracking_id=?1",
                    params![tracking_id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(TrackerError::NotFound(tracking_id.to_string()));
            }
        }
        Ok(changed == 1)
    }

    /// Most recent decided (WIN/LOSS) picks as calibration pairs
    pub fn calibration_samples(&self, limit: i64) -> TrackerResult<Vec<CalibrationSample>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT raw_confidence, status FROM tracked_predictions
             WHERE status IN ('WIN','LOSS') AND pick_side IS NOT NULL
             ORDER BY resolved_at DESC LIMIT ?1",
        )?;
        let samples = stmt
            .query_map(params![limit], |row| {
                let status: String = row.get(1)?;
                Ok(CalibrationSample {
                    confidence: row.get(0)?,
                    was_correct: status == "WIN",
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(samples)
    }

    /// Count tracked predictions per status
    pub fn status_counts(&self) -> TrackerResult<HashMap<String, i64>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM tracked_predictions GROUP BY status")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }

    // ── Team ratings ──────────────────────────────────────────────────────────

    /// Load every persisted rating for one sport
    pub fn load_ratings(&self, sport: Sport) -> TrackerResult<Vec<TeamRating>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT team_key, team_name, rating, games FROM team_ratings WHERE sport=?1",
        )?;
        let ratings = stmt
            .query_map(params![sport.as_str()], |row| {
                Ok(TeamRating {
                    sport,
                    key: row.get(0)?,
                    team: row.get(1)?,
                    rating: row.get(2)?,
                    games: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ratings)
    }

    /// Persist the rating update for one finished event, at most once per
    /// (sport, event). Both sides and the marker land in one transaction.
    /// Returns `false` and writes nothing when the event was already rated,
    /// even by an earlier reconcile pass.
    pub fn rate_event(
        &self,
        sport: Sport,
        event_id: &str,
        ratings: &[TeamRating],
    ) -> TrackerResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO rated_events (sport, event_id, rated_at) VALUES (?1,?2,?3)",
            params![sport.as_str(), event_id, Utc::now()],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        write_ratings(&tx, ratings)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn is_event_rated(&self, sport: Sport, event_id: &str) -> TrackerResult<bool> {
        let conn = self.conn();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM rated_events WHERE sport=?1 AND event_id=?2",
                params![sport.as_str(), event_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ── Performance ───────────────────────────────────────────────────────────

    /// Outcome slice of every prediction created at or after `since`
    pub fn outcome_records(&self, since: DateTime<Utc>) -> TrackerResult<Vec<OutcomeRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT sport, status, raw_confidence, agreement, resolved_at
             FROM tracked_predictions
             WHERE created_at >= ?1 ORDER BY created_at ASC",
        )?;
        let records = stmt
            .query_map(params![since], |row| {
                let sport: String = row.get(0)?;
                let status: String = row.get(1)?;
                let status: PredictionStatus = status.parse().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                })?;
                let agreement: String = row.get(3)?;
                Ok(OutcomeRecord {
                    sport: Sport::from_code(&sport),
                    status,
                    raw_confidence: row.get(2)?,
                    strong_consensus: agreement == AgreementStatus::StrongConsensus.as_str(),
                    resolved_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const TRACKED_COLUMNS: &str = "tracking_id, event_id, sport, home_team, away_team, scheduled_at,
    status, context_json, consensus_json, calibrated_json,
    home_score, away_score, winner, created_at, resolved_at,
    raw_confidence, calibrated_confidence";

fn write_ratings(tx: &rusqlite::Transaction, ratings: &[TeamRating]) -> TrackerResult<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO team_ratings (sport, team_key, team_name, rating, games, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6)
         ON CONFLICT(sport, team_key) DO UPDATE SET
            team_name=excluded.team_name,
            rating=excluded.rating,
            games=excluded.games,
            updated_at=excluded.updated_at",
    )?;
    let now = Utc::now();
    for r in ratings {
        stmt.execute(params![r.sport.as_str(), r.key, r.team, r.rating, r.games, now])?;
    }
    Ok(())
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Home => "home",
        Side::Away => "away",
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_tracked(row: &rusqlite::Row) -> rusqlite::Result<TrackedPrediction> {
    let sport: String = row.get(2)?;
    let status: String = row.get(6)?;
    let status: PredictionStatus = status
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    let consensus: ConsensusResult = json_column(row, 8)?;
    Ok(TrackedPrediction {
        tracking_id: row.get(0)?,
        event_id: row.get(1)?,
        sport: Sport::from_code(&sport),
        home_team: row.get(3)?,
        away_team: row.get(4)?,
        scheduled_at: row.get(5)?,
        pick: consensus.pick.clone(),
        status,
        context: json_column(row, 7)?,
        consensus,
        calibrated: json_column(row, 9)?,
        home_score: row.get(10)?,
        away_score: row.get(11)?,
        winner: row.get(12)?,
        created_at: row.get(13)?,
        resolved_at: row.get(14)?,
        raw_confidence: row.get(15)?,
        calibrated_confidence: row.get(16)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_predictions (
    tracking_id           TEXT    PRIMARY KEY,
    event_id              TEXT    NOT NULL,
    sport                 TEXT    NOT NULL,
    home_team             TEXT    NOT NULL,
    away_team             TEXT    NOT NULL,
    scheduled_at          TEXT    NOT NULL,
    pick_side             TEXT,
    pick_team             TEXT    NOT NULL,
    raw_confidence        REAL    NOT NULL,
    calibrated_confidence REAL    NOT NULL,
    agreement             TEXT    NOT NULL,
    tier                  TEXT    NOT NULL,
    status                TEXT    NOT NULL DEFAULT 'PENDING',
    context_json          TEXT    NOT NULL,
    consensus_json        TEXT    NOT NULL,
    calibrated_json       TEXT    NOT NULL,
    home_score            INTEGER,
    away_score            INTEGER,
    winner                TEXT,
    created_at            TEXT    NOT NULL,
    resolved_at           TEXT
);

CREATE TABLE IF NOT EXISTS team_ratings (
    sport       TEXT    NOT NULL,
    team_key    TEXT    NOT NULL,
    team_name   TEXT    NOT NULL,
    rating      REAL    NOT NULL,
    games       INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT    NOT NULL,
    PRIMARY KEY (sport, team_key)
);

CREATE TABLE IF NOT EXISTS rated_events (
    sport       TEXT    NOT NULL,
    event_id    TEXT    NOT NULL,
    rated_at    TEXT    NOT NULL,
    PRIMARY KEY (sport, event_id)
);

CREATE INDEX IF NOT EXISTS idx_tracked_status ON tracked_predictions(status);
CREATE INDEX IF NOT EXISTS idx_tracked_scheduled ON tracked_predictions(scheduled_at);
CREATE INDEX IF NOT EXISTS idx_tracked_resolved ON tracked_predictions(resolved_at);
CREATE INDEX IF NOT EXISTS idx_tracked_created ON tracked_predictions(created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::baseline::compute_baseline;
    use crate::engine::calibration::ReliabilityCurve;
    use crate::engine::consensus::StakeSettings;
    use crate::engine::pipeline::recommend;
    use chrono::TimeZone;

    fn tracked(id: &str, pick: &str, created_min: u32) -> TrackedPrediction {
        let ctx = GameContext {
            event_id: format!("evt-{id}"),
            sport: "NHL".to_string(),
            home_team: "Boston Bruins".to_string(),
            away_team: "Toronto Maple Leafs".to_string(),
            scheduled_at: Utc.with_ymd_and_hms(2026, 10, 10, 23, 0, 0).unwrap(),
            venue: None,
            home_moneyline: Some(-120),
            away_moneyline: Some(100),
            home_rating: None,
            away_rating: None,
            situation: Default::default(),
        };
        let baseline = compute_baseline(&ctx);
        let raw = vec![RawOpinion {
            provider: "alpha".to_string(),
            predicted_side: Some(pick.to_string()),
            confidence: Some(0.7),
            ..Default::default()
        }];
        let rec = recommend(
            ctx,
            baseline,
            &raw,
            &ReliabilityCurve::new(5),
            StakeSettings::default(),
            Utc::now(),
        );
        TrackedPrediction {
            tracking_id: id.to_string(),
            event_id: rec.context.event_id.clone(),
            sport: rec.context.sport_kind(),
            home_team: rec.context.home_team.clone(),
            away_team: rec.context.away_team.clone(),
            scheduled_at: rec.context.scheduled_at,
            pick: rec.consensus.pick.clone(),
            raw_confidence: rec.consensus.confidence,
            calibrated_confidence: rec.calibrated.calibrated_confidence,
            status: PredictionStatus::Pending,
            context: rec.context,
            consensus: rec.consensus,
            calibrated: rec.calibrated,
            home_score: None,
            away_score: None,
            winner: None,
            created_at: Utc.with_ymd_and_hms(2026, 10, 10, 12, created_min, 0).unwrap(),
            resolved_at: None,
        }
    }

    fn win() -> Resolution {
        Resolution {
            status: PredictionStatus::Win,
            home_score: Some(4),
            away_score: Some(2),
            winner: Some("Boston Bruins".to_string()),
        }
    }

    #[test]
    fn stores_and_reloads_snapshots() {
        let db = Database::open_in_memory().unwrap();
        let p = tracked("t1", "Bruins", 0);
        db.insert_tracked(&p).unwrap();
        let loaded = db.get_tracked("t1").unwrap();
        assert_eq!(loaded.pick, p.pick);
        assert_eq!(loaded.status, PredictionStatus::Pending);
        assert_eq!(loaded.context, p.context);
        assert_eq!(loaded.scheduled_at, p.scheduled_at);
        assert_eq!(loaded.raw_confidence, p.raw_confidence);
        assert_eq!(loaded.consensus.agreement, p.consensus.agreement);
        assert_eq!(loaded.calibrated.tier, p.calibrated.tier);
        assert!(matches!(db.get_tracked("nope"), Err(TrackerError::NotFound(_))));
    }

    #[test]
    fn resolution_is_one_way() {
        let db = Database::open_in_memory().unwrap();
        db.insert_tracked(&tracked("t1", "home", 0)).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 11, 3, 0, 0).unwrap();

        assert!(db.resolve_tracked("t1", &win(), at).unwrap());
        let loss = Resolution {
            status: PredictionStatus::Loss,
            ..win()
        };
        assert!(!db.resolve_tracked("t1", &loss, at).unwrap());
        assert!(matches!(
            db.resolve_tracked("missing", &win(), at),
            Err(TrackerError::NotFound(_))
        ));

        let stored = db.get_tracked("t1").unwrap();
        assert_eq!(stored.status, PredictionStatus::Win);
        assert_eq!(stored.resolved_at, Some(at));
        assert!(db.list_pending().unwrap().is_empty());
    }

    #[test]
    fn calibration_samples_and_counts() {
        let db = Database::open_in_memory().unwrap();
        db.insert_tracked(&tracked("t1", "home", 0)).unwrap();
        db.insert_tracked(&tracked("t2", "away", 1)).unwrap();
        db.insert_tracked(&tracked("t3", "home", 2)).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 11, 3, 0, 0).unwrap();
        db.resolve_tracked("t1", &win(), at).unwrap();
        db.resolve_tracked(
            "t2",
            &Resolution {
                status: PredictionStatus::Loss,
                ..win()
            },
            at,
        )
        .unwrap();

        let samples = db.calibration_samples(100).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.iter().filter(|s| s.was_correct).count(), 1);

        let counts = db.status_counts().unwrap();
        assert_eq!(counts.get("PENDING"), Some(&1));
        assert_eq!(counts.get("WIN"), Some(&1));

        let listed = db.list_tracked(None, 10).unwrap();
        assert_eq!(listed[0].tracking_id, "t3");
        let pending = db.list_tracked(Some(PredictionStatus::Pending), 10).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn event_is_rated_once_across_calls() {
        let db = Database::open_in_memory().unwrap();
        let rating = |value: f64| TeamRating {
            sport: Sport::Nhl,
            key: "bruins".to_string(),
            team: "Boston Bruins".to_string(),
            rating: value,
            games: 1,
        };
        assert!(!db.is_event_rated(Sport::Nhl, "evt-1").unwrap());
        assert!(db.rate_event(Sport::Nhl, "evt-1", &[rating(1516.0)]).unwrap());
        assert!(!db.rate_event(Sport::Nhl, "evt-1", &[rating(1532.0)]).unwrap());
        assert!(db.is_event_rated(Sport::Nhl, "evt-1").unwrap());
        // Same id in another sport is a different event
        assert!(!db.is_event_rated(Sport::Nba, "evt-1").unwrap());

        let loaded = db.load_ratings(Sport::Nhl).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].rating, 1516.0);
    }

    #[test]
    fn outcome_records_respect_the_window() {
        let db = Database::open_in_memory().unwrap();
        db.insert_tracked(&tracked("t1", "home", 0)).unwrap();
        db.insert_tracked(&tracked("t2", "away", 30)).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 11, 3, 0, 0).unwrap();
        db.resolve_tracked("t2", &win(), at).unwrap();

        let all = db
            .outcome_records(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap())
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, PredictionStatus::Pending);
        assert_eq!(all[1].status, PredictionStatus::Win);
        assert_eq!(all[1].resolved_at, Some(at));
        assert_eq!(all[1].sport, Sport::Nhl);
        // A single opinion is never strong consensus
        assert!(!all[1].strong_consensus);

        let later = db
            .outcome_records(Utc.with_ymd_and_hms(2026, 10, 10, 12, 15, 0).unwrap())
            .unwrap();
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn ratings_upsert_per_sport() {
        let db = Database::open_in_memory().unwrap();
        let rating = |key: &str, rating: f64| TeamRating {
            sport: Sport::Nhl,
            key: key.to_string(),
            team: key.to_string(),
            rating,
            games: 1,
        };
        db.rate_event(
            Sport::Nhl,
            "evt-1",
            &[rating("bruins", 1510.0), rating("maple leafs", 1490.0)],
        )
        .unwrap();
        db.rate_event(Sport::Nhl, "evt-2", &[rating("bruins", 1520.0)])
            .unwrap();

        let mut loaded = db.load_ratings(Sport::Nhl).unwrap();
        loaded.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].rating, 1520.0);
        assert!(db.load_ratings(Sport::Nba).unwrap().is_empty());
    }
}
