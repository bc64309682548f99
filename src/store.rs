use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::team_form::FormSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
}

impl MatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::Finished => "finished",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "scheduled" => Some(MatchStatus::Scheduled),
            "live" => Some(MatchStatus::Live),
            "finished" => Some(MatchStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchOdds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: u64,
    pub league_id: u32,
    pub home_team_id: u32,
    pub away_team_id: u32,
    pub date: DateTime<Utc>,
    pub status: MatchStatus,
    pub home_goals: Option<i32>,
    pub away_goals: Option<i32>,
    pub odds: Option<MatchOdds>,
}

impl MatchRecord {
    /// Class label for a finished match: 0 away win, 1 draw, 2 home win.
    pub fn outcome_label(&self) -> Option<u8> {
        if self.status != MatchStatus::Finished {
            return None;
        }
        let (Some(home_goals), Some(away_goals)) = (self.home_goals, self.away_goals) else {
            return None;
        };
        if home_goals > away_goals {
            Some(2)
        } else if home_goals < away_goals {
            Some(0)
        } else {
            Some(1)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: u32,
    pub name: String,
    /// 0-100 scale; None means unrated (feature extraction substitutes 70.0).
    pub strength_rating: Option<f64>,
    pub home_advantage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjuryRecord {
    pub team_id: u32,
    pub start: DateTime<Utc>,
    pub expected_return: DateTime<Utc>,
    /// 1-10 severity; None means unreported (treated as 5).
    pub impact_score: Option<u8>,
}

impl InjuryRecord {
    pub fn active_at(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.expected_return
    }
}

/// Narrow read interface onto the collaborator data store. The core only
/// writes through `put_form_snapshot`, which must be an atomic whole-snapshot
/// replace (last-writer-wins).
pub trait MatchStore: Send + Sync {
    fn get_match(&self, id: u64) -> Result<Option<MatchRecord>>;

    /// Finished matches involving `team_id` dated strictly before `before`,
    /// most recent first, capped at `limit`.
    fn get_recent_finished_matches(
        &self,
        team_id: u32,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>>;

    /// Finished meetings between the two teams regardless of venue, most
    /// recent first, capped at `limit`.
    fn get_head_to_head(
        &self,
        team_a: u32,
        team_b: u32,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>>;

    fn get_active_injuries(&self, team_id: u32, as_of: DateTime<Utc>) -> Result<Vec<InjuryRecord>>;

    fn get_team(&self, id: u32) -> Result<Option<TeamRef>>;

    /// Finished matches, optionally filtered by league, most recent first,
    /// capped at `limit`. Used by the training engine to assemble datasets.
    fn list_finished_matches(&self, league_id: Option<u32>, limit: usize)
    -> Result<Vec<MatchRecord>>;

    fn list_team_ids(&self) -> Result<Vec<u32>>;

    fn put_form_snapshot(&self, snapshot: &FormSnapshot) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    matches: Vec<MatchRecord>,
    teams: HashMap<u32, TeamRef>,
    injuries: Vec<InjuryRecord>,
    form_snapshots: HashMap<u32, FormSnapshot>,
}

/// In-process store used by tests and the demo binary.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_team(&self, team: TeamRef) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.teams.insert(team.id, team);
    }

    pub fn add_match(&self, record: MatchRecord) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.matches.push(record);
    }

    pub fn add_injury(&self, injury: InjuryRecord) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.injuries.push(injury);
    }

    /// Corrective update by the store owner, e.g. marking a match finished.
    pub fn update_match(&self, record: MatchRecord) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        if let Some(existing) = inner.matches.iter_mut().find(|m| m.id == record.id) {
            *existing = record;
        } else {
            inner.matches.push(record);
        }
    }

    pub fn form_snapshot(&self, team_id: u32) -> Option<FormSnapshot> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner.form_snapshots.get(&team_id).cloned()
    }
}

fn finished_desc(mut rows: Vec<MatchRecord>, limit: usize) -> Vec<MatchRecord> {
    rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
    rows.truncate(limit);
    rows
}

impl MatchStore for MemoryStore {
    fn get_match(&self, id: u64) -> Result<Option<MatchRecord>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.matches.iter().find(|m| m.id == id).cloned())
    }

    fn get_recent_finished_matches(
        &self,
        team_id: u32,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let rows = inner
            .matches
            .iter()
            .filter(|m| m.status == MatchStatus::Finished && m.date < before)
            .filter(|m| m.home_team_id == team_id || m.away_team_id == team_id)
            .cloned()
            .collect();
        Ok(finished_desc(rows, limit))
    }

    fn get_head_to_head(
        &self,
        team_a: u32,
        team_b: u32,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let rows = inner
            .matches
            .iter()
            .filter(|m| m.status == MatchStatus::Finished && m.date < before)
            .filter(|m| {
                (m.home_team_id == team_a && m.away_team_id == team_b)
                    || (m.home_team_id == team_b && m.away_team_id == team_a)
            })
            .cloned()
            .collect();
        Ok(finished_desc(rows, limit))
    }

    fn get_active_injuries(&self, team_id: u32, as_of: DateTime<Utc>) -> Result<Vec<InjuryRecord>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner
            .injuries
            .iter()
            .filter(|inj| inj.team_id == team_id && inj.active_at(as_of))
            .cloned()
            .collect())
    }

    fn get_team(&self, id: u32) -> Result<Option<TeamRef>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        Ok(inner.teams.get(&id).cloned())
    }

    fn list_finished_matches(
        &self,
        league_id: Option<u32>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let rows = inner
            .matches
            .iter()
            .filter(|m| m.status == MatchStatus::Finished)
            .filter(|m| league_id.is_none_or(|league| m.league_id == league))
            .cloned()
            .collect();
        Ok(finished_desc(rows, limit))
    }

    fn list_team_ids(&self) -> Result<Vec<u32>> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        let mut ids: Vec<u32> = inner.teams.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn put_form_snapshot(&self, snapshot: &FormSnapshot) -> Result<()> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner
            .form_snapshots
            .insert(snapshot.team_id, snapshot.clone());
        Ok(())
    }
}

/// SQLite-backed store. Reads are serialized through a single connection;
/// the query surface matches `MatchStore` one-to-one.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_team(&self, team: &TeamRef) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO teams (team_id, name, strength_rating, home_advantage)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(team_id) DO UPDATE SET
                name = excluded.name,
                strength_rating = excluded.strength_rating,
                home_advantage = excluded.home_advantage
            "#,
            params![
                team.id as i64,
                team.name,
                team.strength_rating,
                team.home_advantage
            ],
        )
        .context("upsert team")?;
        Ok(())
    }

    pub fn upsert_match(&self, m: &MatchRecord) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO matches (
                match_id, league_id, home_team_id, away_team_id, utc_time,
                status, home_goals, away_goals, home_odds, draw_odds, away_odds,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(match_id) DO UPDATE SET
                league_id = excluded.league_id,
                home_team_id = excluded.home_team_id,
                away_team_id = excluded.away_team_id,
                utc_time = excluded.utc_time,
                status = excluded.status,
                home_goals = excluded.home_goals,
                away_goals = excluded.away_goals,
                home_odds = excluded.home_odds,
                draw_odds = excluded.draw_odds,
                away_odds = excluded.away_odds,
                updated_at = excluded.updated_at
            "#,
            params![
                m.id as i64,
                m.league_id as i64,
                m.home_team_id as i64,
                m.away_team_id as i64,
                m.date.to_rfc3339(),
                m.status.as_str(),
                m.home_goals,
                m.away_goals,
                m.odds.map(|o| o.home),
                m.odds.map(|o| o.draw),
                m.odds.map(|o| o.away),
                Utc::now().to_rfc3339(),
            ],
        )
        .context("upsert match")?;
        Ok(())
    }

    pub fn insert_injury(&self, injury: &InjuryRecord) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO injuries (team_id, start_time, expected_return, impact_score)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                injury.team_id as i64,
                injury.start.to_rfc3339(),
                injury.expected_return.to_rfc3339(),
                injury.impact_score.map(|s| s as i64),
            ],
        )
        .context("insert injury")?;
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            utc_time TEXT NOT NULL,
            status TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            home_odds REAL NULL,
            draw_odds REAL NULL,
            away_odds REAL NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league_id);
        CREATE INDEX IF NOT EXISTS idx_matches_utc_time ON matches(utc_time);
        CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status);

        CREATE TABLE IF NOT EXISTS teams (
            team_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            strength_rating REAL NULL,
            home_advantage REAL NULL
        );

        CREATE TABLE IF NOT EXISTS injuries (
            injury_id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_id INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            expected_return TEXT NOT NULL,
            impact_score INTEGER NULL
        );
        CREATE INDEX IF NOT EXISTS idx_injuries_team ON injuries(team_id);

        CREATE TABLE IF NOT EXISTS form_snapshots (
            team_id INTEGER PRIMARY KEY,
            snapshot_json TEXT NOT NULL,
            last_updated TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

const MATCH_COLUMNS: &str = "match_id, league_id, home_team_id, away_team_id, utc_time, \
     status, home_goals, away_goals, home_odds, draw_odds, away_odds";

fn utc_from_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
        })
}

fn match_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchRecord> {
    let utc_time: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let home_odds: Option<f64> = row.get(8)?;
    let draw_odds: Option<f64> = row.get(9)?;
    let away_odds: Option<f64> = row.get(10)?;
    let odds = match (home_odds, draw_odds, away_odds) {
        (Some(home), Some(draw), Some(away)) => Some(MatchOdds { home, draw, away }),
        _ => None,
    };
    Ok(MatchRecord {
        id: row.get::<_, i64>(0)? as u64,
        league_id: row.get::<_, i64>(1)? as u32,
        home_team_id: row.get::<_, i64>(2)? as u32,
        away_team_id: row.get::<_, i64>(3)? as u32,
        date: utc_from_column(4, &utc_time)?,
        status: MatchStatus::parse(&status_raw).unwrap_or(MatchStatus::Scheduled),
        home_goals: row.get(6)?,
        away_goals: row.get(7)?,
        odds,
    })
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp '{raw}'"))
}

fn collect_matches(rows: Vec<rusqlite::Result<MatchRecord>>) -> Result<Vec<MatchRecord>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row.context("decode match row")?);
    }
    Ok(out)
}

impl MatchStore for SqliteStore {
    fn get_match(&self, id: u64) -> Result<Option<MatchRecord>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MATCH_COLUMNS} FROM matches WHERE match_id = ?1"
            ))
            .context("prepare get match query")?;
        let rows: Vec<_> = stmt
            .query_map(params![id as i64], match_from_row)
            .context("query match")?
            .collect();
        Ok(collect_matches(rows)?.into_iter().next())
    }

    fn get_recent_finished_matches(
        &self,
        team_id: u32,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {MATCH_COLUMNS} FROM matches
                WHERE (home_team_id = ?1 OR away_team_id = ?1)
                  AND status = 'finished'
                  AND utc_time < ?2
                ORDER BY utc_time DESC, match_id DESC
                LIMIT ?3
                "#
            ))
            .context("prepare recent matches query")?;
        let rows: Vec<_> = stmt
            .query_map(
                params![team_id as i64, before.to_rfc3339(), limit as i64],
                match_from_row,
            )
            .context("query recent matches")?
            .collect();
        collect_matches(rows)
    }

    fn get_head_to_head(
        &self,
        team_a: u32,
        team_b: u32,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {MATCH_COLUMNS} FROM matches
                WHERE ((home_team_id = ?1 AND away_team_id = ?2)
                    OR (home_team_id = ?2 AND away_team_id = ?1))
                  AND status = 'finished'
                  AND utc_time < ?3
                ORDER BY utc_time DESC, match_id DESC
                LIMIT ?4
                "#
            ))
            .context("prepare head-to-head query")?;
        let rows: Vec<_> = stmt
            .query_map(
                params![
                    team_a as i64,
                    team_b as i64,
                    before.to_rfc3339(),
                    limit as i64
                ],
                match_from_row,
            )
            .context("query head-to-head")?
            .collect();
        collect_matches(rows)
    }

    fn get_active_injuries(&self, team_id: u32, as_of: DateTime<Utc>) -> Result<Vec<InjuryRecord>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let mut stmt = conn
            .prepare(
                r#"
                SELECT team_id, start_time, expected_return, impact_score
                FROM injuries
                WHERE team_id = ?1 AND start_time <= ?2 AND expected_return > ?2
                "#,
            )
            .context("prepare injuries query")?;
        let rows: Vec<rusqlite::Result<(i64, String, String, Option<i64>)>> = stmt
            .query_map(params![team_id as i64, as_of.to_rfc3339()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .context("query injuries")?
            .collect();

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let (team, start, expected_return, impact) = row.context("decode injury row")?;
            out.push(InjuryRecord {
                team_id: team as u32,
                start: parse_utc(&start)?,
                expected_return: parse_utc(&expected_return)?,
                impact_score: impact.map(|v| v.clamp(1, 10) as u8),
            });
        }
        Ok(out)
    }

    fn get_team(&self, id: u32) -> Result<Option<TeamRef>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT team_id, name, strength_rating, home_advantage FROM teams WHERE team_id = ?1")
            .context("prepare get team query")?;
        let mut rows = stmt
            .query_map(params![id as i64], |row| {
                Ok(TeamRef {
                    id: row.get::<_, i64>(0)? as u32,
                    name: row.get(1)?,
                    strength_rating: row.get(2)?,
                    home_advantage: row.get(3)?,
                })
            })
            .context("query team")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("decode team row")?)),
            None => Ok(None),
        }
    }

    fn list_finished_matches(
        &self,
        league_id: Option<u32>,
        limit: usize,
    ) -> Result<Vec<MatchRecord>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let (filter, league_param) = match league_id {
            Some(league) => ("AND league_id = ?2", league as i64),
            None => ("AND ?2 >= 0", 0_i64),
        };
        let mut stmt = conn
            .prepare(&format!(
                r#"
                SELECT {MATCH_COLUMNS} FROM matches
                WHERE status = 'finished' {filter}
                ORDER BY utc_time DESC, match_id DESC
                LIMIT ?1
                "#
            ))
            .context("prepare finished matches query")?;
        let rows: Vec<_> = stmt
            .query_map(params![limit as i64, league_param], match_from_row)
            .context("query finished matches")?
            .collect();
        collect_matches(rows)
    }

    fn list_team_ids(&self) -> Result<Vec<u32>> {
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        let mut stmt = conn
            .prepare("SELECT team_id FROM teams ORDER BY team_id ASC")
            .context("prepare team ids query")?;
        let rows: Vec<rusqlite::Result<i64>> = stmt
            .query_map([], |row| row.get(0))
            .context("query team ids")?
            .collect();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.context("decode team id")? as u32);
        }
        Ok(out)
    }

    fn put_form_snapshot(&self, snapshot: &FormSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot).context("serialize form snapshot")?;
        let conn = self.conn.lock().expect("sqlite store lock poisoned");
        conn.execute(
            r#"
            INSERT INTO form_snapshots (team_id, snapshot_json, last_updated)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(team_id) DO UPDATE SET
                snapshot_json = excluded.snapshot_json,
                last_updated = excluded.last_updated
            "#,
            params![
                snapshot.team_id as i64,
                json,
                snapshot.last_updated.to_rfc3339()
            ],
        )
        .context("upsert form snapshot")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 15, 0, 0).unwrap()
    }

    fn finished(id: u64, home: u32, away: u32, day: u32, hg: i32, ag: i32) -> MatchRecord {
        MatchRecord {
            id,
            league_id: 1,
            home_team_id: home,
            away_team_id: away,
            date: ts(day),
            status: MatchStatus::Finished,
            home_goals: Some(hg),
            away_goals: Some(ag),
            odds: None,
        }
    }

    #[test]
    fn outcome_label_follows_convention() {
        assert_eq!(finished(1, 1, 2, 1, 2, 0).outcome_label(), Some(2));
        assert_eq!(finished(2, 1, 2, 1, 0, 2).outcome_label(), Some(0));
        assert_eq!(finished(3, 1, 2, 1, 1, 1).outcome_label(), Some(1));

        let mut scheduled = finished(4, 1, 2, 1, 0, 0);
        scheduled.status = MatchStatus::Scheduled;
        scheduled.home_goals = None;
        scheduled.away_goals = None;
        assert_eq!(scheduled.outcome_label(), None);
    }

    #[test]
    fn memory_store_orders_recent_matches_desc() {
        let store = MemoryStore::new();
        store.add_match(finished(1, 10, 20, 1, 1, 0));
        store.add_match(finished(2, 20, 10, 5, 2, 2));
        store.add_match(finished(3, 10, 30, 3, 0, 1));

        let rows = store
            .get_recent_finished_matches(10, ts(28), 10)
            .expect("store read");
        let ids: Vec<u64> = rows.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);

        let capped = store
            .get_recent_finished_matches(10, ts(28), 2)
            .expect("store read");
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn sqlite_store_round_trips_matches_and_teams() {
        let store = SqliteStore::open_in_memory().expect("open db");
        store
            .upsert_team(&TeamRef {
                id: 10,
                name: "Alaves".to_string(),
                strength_rating: Some(64.0),
                home_advantage: Some(1.1),
            })
            .expect("upsert team");
        let mut m = finished(7, 10, 20, 4, 3, 1);
        m.odds = Some(MatchOdds {
            home: 1.9,
            draw: 3.4,
            away: 3.75,
        });
        store.upsert_match(&m).expect("upsert match");

        let fetched = store.get_match(7).expect("get match").expect("present");
        assert_eq!(fetched.home_team_id, 10);
        assert_eq!(fetched.date, ts(4));
        assert!(fetched.odds.is_some());

        let team = store.get_team(10).expect("get team").expect("present");
        assert_eq!(team.name, "Alaves");
        assert!(store.get_team(99).expect("get team").is_none());

        let finished_rows = store
            .list_finished_matches(Some(1), 100)
            .expect("list finished");
        assert_eq!(finished_rows.len(), 1);
        assert!(
            store
                .list_finished_matches(Some(2), 100)
                .expect("list finished")
                .is_empty()
        );
    }

    #[test]
    fn sqlite_injury_window_is_half_open() {
        let store = SqliteStore::open_in_memory().expect("open db");
        store
            .insert_injury(&InjuryRecord {
                team_id: 10,
                start: ts(1),
                expected_return: ts(10),
                impact_score: Some(7),
            })
            .expect("insert injury");

        assert_eq!(store.get_active_injuries(10, ts(5)).unwrap().len(), 1);
        assert_eq!(store.get_active_injuries(10, ts(10)).unwrap().len(), 0);
        assert_eq!(store.get_active_injuries(20, ts(5)).unwrap().len(), 0);
    }
}
