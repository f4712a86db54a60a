use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};

use crate::config::app_data_dir;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A finished football match with a known final score.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub match_id: String,
    pub league: String,
    pub match_date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: u32,
    pub away_goals: u32,
}

impl StoredMatch {
    pub fn outcome(&self) -> char {
        if self.home_goals > self.away_goals {
            'H'
        } else if self.home_goals < self.away_goals {
            'A'
        } else {
            'D'
        }
    }

    pub fn total_goals(&self) -> u32 {
        self.home_goals + self.away_goals
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredTennisMatch {
    pub match_id: String,
    pub tournament: String,
    /// `G` grand slam, `M` masters, anything else for lower tiers.
    pub level: Option<String>,
    pub surface: Option<String>,
    pub match_date: NaiveDate,
    pub winner: String,
    pub loser: String,
    pub winner_rank: Option<u32>,
    pub loser_rank: Option<u32>,
}

pub fn default_db_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join("history.sqlite"))
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            match_id TEXT PRIMARY KEY,
            league TEXT NOT NULL,
            match_date TEXT NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NOT NULL,
            away_goals INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league);
        CREATE INDEX IF NOT EXISTS idx_matches_date ON matches(match_date);

        CREATE TABLE IF NOT EXISTS tennis_matches (
            match_id TEXT PRIMARY KEY,
            tournament TEXT NOT NULL,
            level TEXT NULL,
            surface TEXT NULL,
            match_date TEXT NOT NULL,
            winner TEXT NOT NULL,
            loser TEXT NOT NULL,
            winner_rank INTEGER NULL,
            loser_rank INTEGER NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tennis_date ON tennis_matches(match_date);
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

pub fn upsert_matches(conn: &mut Connection, rows: &[StoredMatch]) -> Result<usize> {
    let tx = conn.transaction().context("begin match upsert")?;
    let updated_at = Utc::now().to_rfc3339();
    for m in rows {
        tx.execute(
            r#"
            INSERT INTO matches (
                match_id, league, match_date, home_team, away_team,
                home_goals, away_goals, outcome, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(match_id) DO UPDATE SET
                league = excluded.league,
                match_date = excluded.match_date,
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                home_goals = excluded.home_goals,
                away_goals = excluded.away_goals,
                outcome = excluded.outcome,
                updated_at = excluded.updated_at
            "#,
            params![
                m.match_id,
                m.league,
                m.match_date.format(DATE_FORMAT).to_string(),
                m.home_team,
                m.away_team,
                m.home_goals,
                m.away_goals,
                m.outcome().to_string(),
                updated_at,
            ],
        )
        .with_context(|| format!("upsert match {}", m.match_id))?;
    }
    tx.commit().context("commit match upsert")?;
    Ok(rows.len())
}

pub fn upsert_tennis_matches(conn: &mut Connection, rows: &[StoredTennisMatch]) -> Result<usize> {
    let tx = conn.transaction().context("begin tennis upsert")?;
    let updated_at = Utc::now().to_rfc3339();
    for m in rows {
        tx.execute(
            r#"
            INSERT INTO tennis_matches (
                match_id, tournament, level, surface, match_date,
                winner, loser, winner_rank, loser_rank, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(match_id) DO UPDATE SET
                tournament = excluded.tournament,
                level = excluded.level,
                surface = excluded.surface,
                match_date = excluded.match_date,
                winner = excluded.winner,
                loser = excluded.loser,
                winner_rank = excluded.winner_rank,
                loser_rank = excluded.loser_rank,
                updated_at = excluded.updated_at
            "#,
            params![
                m.match_id,
                m.tournament,
                m.level,
                m.surface,
                m.match_date.format(DATE_FORMAT).to_string(),
                m.winner,
                m.loser,
                m.winner_rank,
                m.loser_rank,
                updated_at,
            ],
        )
        .with_context(|| format!("upsert tennis match {}", m.match_id))?;
    }
    tx.commit().context("commit tennis upsert")?;
    Ok(rows.len())
}

fn parse_date(idx: usize, raw: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Finished matches ordered by date, optionally for one league only.
pub fn load_finished_matches(conn: &Connection, league: Option<&str>) -> Result<Vec<StoredMatch>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, league, match_date, home_team, away_team, home_goals, away_goals
            FROM matches
            WHERE (?1 IS NULL OR league = ?1)
            ORDER BY match_date ASC, match_id ASC
            "#,
        )
        .context("prepare load matches query")?;

    let rows = stmt
        .query_map(params![league], |row| {
            Ok(StoredMatch {
                match_id: row.get(0)?,
                league: row.get(1)?,
                match_date: parse_date(2, row.get(2)?)?,
                home_team: row.get(3)?,
                away_team: row.get(4)?,
                home_goals: row.get(5)?,
                away_goals: row.get(6)?,
            })
        })
        .context("query load matches")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode match row")?);
    }
    Ok(out)
}

pub fn load_tennis_matches(conn: &Connection) -> Result<Vec<StoredTennisMatch>> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, tournament, level, surface, match_date,
                   winner, loser, winner_rank, loser_rank
            FROM tennis_matches
            ORDER BY match_date ASC, match_id ASC
            "#,
        )
        .context("prepare load tennis matches query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(StoredTennisMatch {
                match_id: row.get(0)?,
                tournament: row.get(1)?,
                level: row.get(2)?,
                surface: row.get(3)?,
                match_date: parse_date(4, row.get(4)?)?,
                winner: row.get(5)?,
                loser: row.get(6)?,
                winner_rank: row.get(7)?,
                loser_rank: row.get(8)?,
            })
        })
        .context("query load tennis matches")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("decode tennis row")?);
    }
    Ok(out)
}
