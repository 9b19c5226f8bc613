use crate::error::{StationError, StationResult};
use crate::station::{DeleteAck, NewStation, Station, StationUpdate, UpdateAck};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistence contract for stations.
///
/// Lookups by `id` act on the first row in natural order, since `id` is not unique.
/// Every call is an independent write or read; there is no cross-call atomicity.
pub trait StationStore: Send + Sync {
    fn insert(&self, station: NewStation) -> StationResult<Station>;

    /// All ids in natural (insertion) order, duplicates included
    fn list_ids(&self) -> StationResult<Vec<i64>>;

    fn find_one(&self, id: i64) -> StationResult<Option<Station>>;

    fn update_one(&self, id: i64, update: &StationUpdate) -> StationResult<UpdateAck>;

    fn delete_one(&self, id: i64) -> StationResult<DeleteAck>;

    fn count(&self) -> StationResult<usize>;
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases report "memory" and that is fine
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    // `seq` gives the natural iteration order, `record_id` is the unique store key.
    // `id` is indexed but deliberately has no UNIQUE constraint.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS stations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            record_id TEXT UNIQUE NOT NULL,
            id INTEGER NOT NULL,
            date TEXT NOT NULL,
            actual INTEGER NOT NULL,
            target INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stations_id ON stations(id)",
        [],
    )?;

    Ok(())
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn station_from_row(row: &Row<'_>) -> rusqlite::Result<Station> {
    let date_str: String = row.get(2)?;
    let date = parse_date(&date_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid station date: {}", date_str).into(),
        )
    })?;

    Ok(Station {
        record_id: row.get(0)?,
        id: row.get(1)?,
        date,
        actual: row.get(3)?,
        target: row.get(4)?,
    })
}

fn map_row_error(err: rusqlite::Error) -> StationError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(_, _, cause) => {
            StationError::Corrupt(cause.to_string())
        }
        other => StationError::Database(other),
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

#[derive(Clone)]
pub struct SqliteStationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStationStore {
    pub fn new(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStationStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::new(conn).context("Failed to initialize stations schema")
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> StationResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StationError::LockPoisoned)
    }
}

impl StationStore for SqliteStationStore {
    fn insert(&self, station: NewStation) -> StationResult<Station> {
        let conn = self.lock()?;
        let record_id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO stations (record_id, id, date, actual, target)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record_id,
                station.id,
                format_date(&station.date),
                station.actual,
                station.target,
            ],
        )?;

        Ok(station.into_station(record_id))
    }

    fn list_ids(&self) -> StationResult<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM stations ORDER BY seq")?;

        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        Ok(ids)
    }

    fn find_one(&self, id: i64) -> StationResult<Option<Station>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT record_id, id, date, actual, target
             FROM stations
             WHERE id = ?1
             ORDER BY seq
             LIMIT 1",
            params![id],
            station_from_row,
        )
        .optional()
        .map_err(map_row_error)
    }

    fn update_one(&self, id: i64, update: &StationUpdate) -> StationResult<UpdateAck> {
        let conn = self.lock()?;

        let current: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT seq, actual, date FROM stations WHERE id = ?1 ORDER BY seq LIMIT 1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((seq, actual, date_str)) = current else {
            return Ok(UpdateAck::new(0, 0));
        };

        let new_date = match update.date {
            Some(date) => format_date(&date.trunc_subsecs(3)),
            None => date_str.clone(),
        };

        let new_actual = update.actual.unwrap_or(actual);

        if new_actual == actual && new_date == date_str {
            return Ok(UpdateAck::new(1, 0));
        }

        let modified = conn.execute(
            "UPDATE stations SET actual = ?1, date = ?2 WHERE seq = ?3",
            params![new_actual, new_date, seq],
        )?;

        Ok(UpdateAck::new(1, modified as u64))
    }

    fn delete_one(&self, id: i64) -> StationResult<DeleteAck> {
        let conn = self.lock()?;

        let deleted = conn.execute(
            "DELETE FROM stations
             WHERE seq = (SELECT seq FROM stations WHERE id = ?1 ORDER BY seq LIMIT 1)",
            params![id],
        )?;

        Ok(DeleteAck::new(deleted as u64))
    }

    fn count(&self) -> StationResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM stations", [], |row| row.get(0))?;

        Ok(count as usize)
    }
}
