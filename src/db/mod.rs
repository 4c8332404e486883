//! SQLite database module for curriculum content
//!
//! This is the persistence boundary of the engine. Every service operation runs
//! as a single transaction on the one connection, so readers never see partial
//! metadata + version, status + version, or a default-variant pointer into a
//! removed variant.
//!
//! ## Tables
//!
//! - `content` - Content metadata, default-variant pointer, analytics counters
//! - `content_topics` - Topic index for keyword filtering
//! - `content_variants` - Learning-style variants, unique per (content, style)
//! - `content_assessments` - Append-only assessment links
//! - `content_changes` - Append-only change ledger (survives content deletion)
//! - `permission_grants` - Scoped permission grants
//! - `units` - Curriculum units with ordered content ids

pub mod schema;
pub mod content;
pub mod variants;
pub mod changes;
pub mod grants;
pub mod search;
pub mod units;

use std::error::Error as StdError;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, Row};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::CurriculumError;
use crate::identity::UserId;

/// SQLite database for content, ledger, grants and units
pub struct ContentDb {
    conn: Mutex<Connection>,
}

impl ContentDb {
    /// Open or create the database file
    pub fn open(db_path: &Path) -> Result<Self, CurriculumError> {
        info!("Opening SQLite database at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // WAL for concurrent readers of the file
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, CurriculumError> {
        debug!("Opening in-memory SQLite database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CurriculumError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), CurriculumError> {
        let conn = self.conn.lock()
            .map_err(|e| CurriculumError::Internal(format!("Lock poisoned: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(())
    }

    /// Run a read with the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CurriculumError>
    where
        F: FnOnce(&Connection) -> Result<T, CurriculumError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| CurriculumError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, CurriculumError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CurriculumError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| CurriculumError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`
    pub fn transaction<F, T>(&self, f: F) -> Result<T, CurriculumError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, CurriculumError>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, CurriculumError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, CurriculumError> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                content_count: count("SELECT COUNT(*) FROM content")?,
                variant_count: count("SELECT COUNT(*) FROM content_variants")?,
                change_count: count("SELECT COUNT(*) FROM content_changes")?,
                unit_count: count("SELECT COUNT(*) FROM units")?,
                grant_count: count("SELECT COUNT(*) FROM permission_grants")?,
                unique_topics: count("SELECT COUNT(DISTINCT topic) FROM content_topics")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub content_count: u64,
    pub variant_count: u64,
    pub change_count: u64,
    pub unit_count: u64,
    pub grant_count: u64,
    pub unique_topics: u64,
}

// =============================================================================
// Column helpers
// =============================================================================

/// Current time at the precision stored in the database
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Unicode lowercase used for keyword matching. SQLite's `LOWER` only folds
/// ASCII, so searchable text is stored pre-folded and compared as-is.
pub(crate) fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
pub(crate) fn to_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(e: E) -> rusqlite::Error
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
}

pub(crate) fn ts_col(row: &Row, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(conversion_error)
}

pub(crate) fn json_col<T: DeserializeOwned>(row: &Row, col: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(conversion_error)
}

pub(crate) fn opt_json_col<T: DeserializeOwned>(row: &Row, col: &str) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| serde_json::from_str(&s).map_err(conversion_error))
        .transpose()
}

pub(crate) fn parse_col<T>(row: &Row, col: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    let raw: String = row.get(col)?;
    raw.parse::<T>().map_err(conversion_error)
}

pub(crate) fn user_col(row: &Row, col: &str) -> rusqlite::Result<UserId> {
    let raw: String = row.get(col)?;
    UserId::new(raw).map_err(conversion_error)
}
