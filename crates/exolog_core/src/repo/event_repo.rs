//! Event repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist normalized events into the `events` table, one row per event.
//! - Execute compiled filters and hand rows to the record codec.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Insert never overwrites: a duplicate id is `StoreError::Conflict`.
//! - Each insert is one IMMEDIATE transaction; partial rows are never visible.
//! - No update or delete path exists.
//! - A corrupt row fails the whole read instead of being dropped.

use crate::codec::{decode, encode, CodecError, StoredRow, STORED_COLUMNS};
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::event::{Event, EventId, NormalizedEvent};
use crate::query::{compile, EventFilter, FilterError};
use chrono::Utc;
use log::{debug, error, info};
use rusqlite::{params_from_iter, Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

const REQUIRED_EVENT_COLUMNS: &[&str] = &[
    "id",
    "timestamp",
    "source_system",
    "channel",
    "actor",
    "direction",
    "summary",
    "content_text",
    "content_json",
    "tags",
    "links_json",
    "raw_json",
    "ingested_at",
];

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer error for event persistence and retrieval.
#[derive(Debug)]
pub enum StoreError {
    /// An event with this id is already stored.
    Conflict(EventId),
    /// Filter rejected before touching storage.
    BadFilter(FilterError),
    /// A persisted row cannot be decoded.
    CorruptRecord(CodecError),
    /// Store is busy, locked or unreachable; callers may retry.
    Unavailable(DbError),
    /// Any other SQLite failure.
    Db(DbError),
    /// Connection schema version does not match this binary.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict(id) => write!(f, "event already exists: {id}"),
            Self::BadFilter(err) => write!(f, "{err}"),
            Self::CorruptRecord(err) => write!(f, "{err}"),
            Self::Unavailable(err) => write!(f, "event store unavailable: {err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection is not initialized: expected schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "missing required column `{table}.{column}`")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::BadFilter(err) => Some(err),
            Self::CorruptRecord(err) => Some(err),
            Self::Unavailable(err) | Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FilterError> for StoreError {
    fn from(value: FilterError) -> Self {
        Self::BadFilter(value)
    }
}

impl From<CodecError> for StoreError {
    fn from(value: CodecError) -> Self {
        Self::CorruptRecord(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        if value.is_unavailable() {
            Self::Unavailable(value)
        } else {
            Self::Db(value)
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if is_malformed_json_error(&value) {
            return Self::CorruptRecord(CodecError::Corrupt {
                row_id: None,
                column: "tags",
                message: value.to_string(),
            });
        }
        Self::from(DbError::Sqlite(value))
    }
}

/// Columns whose distinct values can be listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctColumn {
    SourceSystem,
    Channel,
    Actor,
    Direction,
}

impl DistinctColumn {
    pub fn as_column(self) -> &'static str {
        match self {
            Self::SourceSystem => "source_system",
            Self::Channel => "channel",
            Self::Actor => "actor",
            Self::Direction => "direction",
        }
    }

    /// Parses a column name, accepting `-` in place of `_`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().replace('-', "_").as_str() {
            "source_system" => Some(Self::SourceSystem),
            "channel" => Some(Self::Channel),
            "actor" => Some(Self::Actor),
            "direction" => Some(Self::Direction),
            _ => None,
        }
    }
}

/// Repository interface for the append-only event log.
pub trait EventRepository {
    /// Persists one event under a freshly generated id.
    fn insert(&self, event: &NormalizedEvent) -> StoreResult<Event>;
    /// Persists one event under a caller-provided id.
    fn insert_with_id(&self, id: EventId, event: &NormalizedEvent) -> StoreResult<Event>;
    /// Loads one event by id.
    fn get_event(&self, id: EventId) -> StoreResult<Option<Event>>;
    /// Runs a filter and returns raw rows in result order.
    fn query(&self, filter: &EventFilter) -> StoreResult<Vec<StoredRow>>;
    /// Runs a filter and decodes every row.
    fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>>;
    /// Lists sorted, distinct, non-empty values of one column.
    fn distinct_values(&self, column: DistinctColumn) -> StoreResult<Vec<String>>;
}

/// SQLite-backed event repository over a caller-owned connection.
pub struct SqliteEventRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEventRepository<'conn> {
    /// Constructs a repository from an initialized connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when `user_version` differs from the
    ///   schema version this binary writes.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` when the schema was
    ///   tampered with.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    /// Streams the rows matching `filter` to `visit`, one at a time.
    ///
    /// Rows are read straight off the statement; nothing is buffered. The
    /// first error from `visit` stops the scan and is returned.
    pub fn query_each<F>(&self, filter: &EventFilter, mut visit: F) -> StoreResult<usize>
    where
        F: FnMut(StoredRow) -> StoreResult<()>,
    {
        let started_at = Instant::now();
        let compiled = compile(filter)?;
        let mut stmt = self.conn.prepare(&compiled.sql)?;
        let mut rows = stmt.query(params_from_iter(compiled.params))?;
        let mut visited = 0usize;

        while let Some(row) = rows.next()? {
            visit(StoredRow::from_sql_row(row)?)?;
            visited += 1;
        }

        debug!(
            "event=event_query module=repo status=ok rows={} tag_predicates={} duration_ms={}",
            visited,
            filter.tags.len(),
            started_at.elapsed().as_millis()
        );
        Ok(visited)
    }
}

impl EventRepository for SqliteEventRepository<'_> {
    fn insert(&self, event: &NormalizedEvent) -> StoreResult<Event> {
        self.insert_with_id(Uuid::new_v4(), event)
    }

    fn insert_with_id(&self, id: EventId, event: &NormalizedEvent) -> StoreResult<Event> {
        let row = encode(id, event, Utc::now());
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            &format!(
                "INSERT INTO events ({STORED_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);"
            ),
            rusqlite::params![
                row.id.as_str(),
                row.timestamp.as_str(),
                row.source_system.as_str(),
                row.channel.as_str(),
                row.actor.as_deref(),
                row.direction.as_deref(),
                row.summary.as_deref(),
                row.content_text.as_deref(),
                row.content_json.as_deref(),
                row.tags.as_deref(),
                row.links_json.as_deref(),
                row.raw_json.as_deref(),
                row.ingested_at.as_str(),
            ],
        );

        if let Err(err) = inserted {
            if is_primary_key_violation(&err) {
                error!(
                    "event=event_insert module=repo status=error error_code=conflict event_id={id}"
                );
                return Err(StoreError::Conflict(id));
            }
            error!("event=event_insert module=repo status=error error_code=db_error error={err}");
            return Err(err.into());
        }
        tx.commit()?;

        info!(
            "event=event_insert module=repo status=ok event_id={} tag_count={}",
            id,
            event.tags.len()
        );
        Ok(decode(row)?)
    }

    fn get_event(&self, id: EventId) -> StoreResult<Option<Event>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {STORED_COLUMNS} FROM events WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(decode(StoredRow::from_sql_row(row)?)?));
        }
        Ok(None)
    }

    fn query(&self, filter: &EventFilter) -> StoreResult<Vec<StoredRow>> {
        let mut collected = Vec::new();
        self.query_each(filter, |row| {
            collected.push(row);
            Ok(())
        })?;
        Ok(collected)
    }

    fn list_events(&self, filter: &EventFilter) -> StoreResult<Vec<Event>> {
        let mut events = Vec::new();
        self.query_each(filter, |row| {
            events.push(decode(row)?);
            Ok(())
        })?;
        Ok(events)
    }

    fn distinct_values(&self, column: DistinctColumn) -> StoreResult<Vec<String>> {
        let name = column.as_column();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {name}
             FROM events
             WHERE {name} IS NOT NULL AND {name} != ''
             ORDER BY {name} ASC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(row.get::<_, String>(0)?);
        }
        Ok(values)
    }
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

fn is_malformed_json_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            message.to_lowercase().contains("malformed json")
        }
        _ => false,
    }
}

fn ensure_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "events")? {
        return Err(StoreError::MissingRequiredTable("events"));
    }

    for column in REQUIRED_EVENT_COLUMNS.iter().copied() {
        if !table_has_column(conn, "events", column)? {
            return Err(StoreError::MissingRequiredColumn {
                table: "events",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
