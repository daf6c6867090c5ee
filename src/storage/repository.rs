//! Event store implementations
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        Reconciler / CLI read path           │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │              EventStore trait               │
//! └─────────────────────────────────────────────┘
//!              │                     │
//!              ▼                     ▼
//! ┌─────────────────────┐ ┌─────────────────────┐
//! │       SQLite        │ │        Mock         │
//! │   Implementation    │ │   Implementation    │
//! └─────────────────────┘ └─────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use serde_json::Value;

use super::{DeleteScope, EventStore, PlaceCount, ReplaceOutcome, StoreError, StoreResult};
use crate::models::CanonicalEvent;
use crate::utils::{format_db_time, parse_db_time};

/// Bound on host parameters per statement
const CHUNK_SIZE: usize = 500;

const EVENT_COLUMNS: &str = "id, name, description, start_time, end_time, updated_time, \
     place, nearest_place, parent_group, owner, source_site, url, crawl_time";

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite-backed [`EventStore`]
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection. Replaces
/// run in an `IMMEDIATE` transaction so the delete+insert pair holds the
/// write lock for its whole duration.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite event store initialized");
        Ok(store)
    }

    /// In-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn create_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS events (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    start_time TEXT NOT NULL,
                    end_time TEXT,
                    updated_time TEXT,
                    place TEXT,
                    nearest_place TEXT,
                    parent_group TEXT,
                    owner TEXT,
                    source_site TEXT NOT NULL,
                    url TEXT NOT NULL,
                    crawl_time TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_events_source_start
                    ON events(source_site, start_time);

                CREATE INDEX IF NOT EXISTS idx_events_nearest_place
                    ON events(nearest_place);
                "#,
        )?;
        Ok(())
    }

    fn query_events(
        conn: &Connection,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> StoreResult<Vec<CanonicalEvent>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CanonicalEvent::try_from).collect()
    }
}

impl EventStore for SqliteEventStore {
    fn replace(
        &self,
        scope: &DeleteScope,
        events: &[CanonicalEvent],
    ) -> StoreResult<ReplaceOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut deleted = tx.execute(
            &format!(
                "DELETE FROM events WHERE source_site = ?1 AND {} > ?2",
                scope.window.sql_column()
            ),
            params![scope.source_site, format_db_time(&scope.after)],
        )?;

        let ids: Vec<&String> = scope.ids.iter().collect();
        for chunk in ids.chunks(CHUNK_SIZE) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let params: Vec<&dyn ToSql> = chunk.iter().map(|s| *s as &dyn ToSql).collect();
            deleted += tx.execute(
                &format!("DELETE FROM events WHERE id IN ({placeholders})"),
                params.as_slice(),
            )?;
        }

        {
            let mut insert = tx.prepare(&format!(
                "INSERT OR REPLACE INTO events ({EVENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ))?;
            for event in events {
                let row = EventRow::try_from(event)?;
                insert.execute(params![
                    row.id,
                    row.name,
                    row.description,
                    row.start_time,
                    row.end_time,
                    row.updated_time,
                    row.place,
                    row.nearest_place,
                    row.parent_group,
                    row.owner,
                    row.source_site,
                    row.url,
                    row.crawl_time,
                ])?;
            }
        }

        tx.commit()?;

        Ok(ReplaceOutcome {
            deleted,
            inserted: events.len(),
        })
    }

    fn upcoming(
        &self,
        now: DateTime<Utc>,
        places: Option<&[String]>,
    ) -> StoreResult<Vec<CanonicalEvent>> {
        let conn = self.conn()?;
        let now = format_db_time(&now);

        match places {
            Some(places) if !places.is_empty() => {
                let placeholders = places.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                let sql = format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE start_time > ? AND nearest_place IN ({placeholders})
                     ORDER BY start_time, id"
                );
                let mut params: Vec<&dyn ToSql> = vec![&now];
                params.extend(places.iter().map(|p| p as &dyn ToSql));
                Self::query_events(&conn, &sql, &params)
            }
            _ => Self::query_events(
                &conn,
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE start_time > ?1 ORDER BY start_time, id"
                ),
                &[&now],
            ),
        }
    }

    fn count_by_place(&self, now: DateTime<Utc>) -> StoreResult<Vec<PlaceCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT nearest_place, COUNT(id) FROM events
             WHERE start_time > ?1
             GROUP BY nearest_place
             ORDER BY nearest_place",
        )?;
        let counts = stmt
            .query_map(params![format_db_time(&now)], |row| {
                Ok(PlaceCount {
                    nearest_place: row.get(0)?,
                    events: row.get::<_, i64>(1)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    fn get(&self, id: &str) -> StoreResult<Option<CanonicalEvent>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                EventRow::from_row,
            )
            .optional()?;
        row.map(CanonicalEvent::try_from).transpose()
    }

    fn all(&self) -> StoreResult<Vec<CanonicalEvent>> {
        let conn = self.conn()?;
        Self::query_events(
            &conn,
            &format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY start_time, id"),
            &[],
        )
    }

    fn count(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(total as usize)
    }
}

/// Column-level representation of an event row
struct EventRow {
    id: String,
    name: String,
    description: Option<String>,
    start_time: String,
    end_time: Option<String>,
    updated_time: Option<String>,
    place: Option<String>,
    nearest_place: Option<String>,
    parent_group: Option<String>,
    owner: Option<String>,
    source_site: String,
    url: String,
    crawl_time: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            updated_time: row.get(5)?,
            place: row.get(6)?,
            nearest_place: row.get(7)?,
            parent_group: row.get(8)?,
            owner: row.get(9)?,
            source_site: row.get(10)?,
            url: row.get(11)?,
            crawl_time: row.get(12)?,
        })
    }
}

fn json_to_column(value: &Option<Value>) -> StoreResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

fn column_to_json(value: Option<String>) -> StoreResult<Option<Value>> {
    value
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(StoreError::from)
}

fn column_to_time(column: &'static str, value: String) -> StoreResult<DateTime<Utc>> {
    parse_db_time(&value).ok_or(StoreError::InvalidTime { column, value })
}

fn optional_column_to_time(
    column: &'static str,
    value: Option<String>,
) -> StoreResult<Option<DateTime<Utc>>> {
    value.map(|v| column_to_time(column, v)).transpose()
}

impl TryFrom<&CanonicalEvent> for EventRow {
    type Error = StoreError;

    fn try_from(event: &CanonicalEvent) -> StoreResult<Self> {
        Ok(Self {
            id: event.id.clone(),
            name: event.name.clone(),
            description: event.description.clone(),
            start_time: format_db_time(&event.start_time),
            end_time: event.end_time.as_ref().map(format_db_time),
            updated_time: event.updated_time.as_ref().map(format_db_time),
            place: json_to_column(&event.place)?,
            nearest_place: event.nearest_place.clone(),
            parent_group: json_to_column(&event.parent_group)?,
            owner: json_to_column(&event.owner)?,
            source_site: event.source_site.clone(),
            url: event.url.clone(),
            crawl_time: format_db_time(&event.crawl_time),
        })
    }
}

impl TryFrom<EventRow> for CanonicalEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> StoreResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            start_time: column_to_time("start_time", row.start_time)?,
            end_time: optional_column_to_time("end_time", row.end_time)?,
            updated_time: optional_column_to_time("updated_time", row.updated_time)?,
            place: column_to_json(row.place)?,
            nearest_place: row.nearest_place,
            parent_group: column_to_json(row.parent_group)?,
            owner: column_to_json(row.owner)?,
            source_site: row.source_site,
            url: row.url,
            crawl_time: column_to_time("crawl_time", row.crawl_time)?,
        })
    }
}

// ============================================================================
// Mock Implementation (for testing)
// ============================================================================

/// In-memory [`EventStore`]
///
/// Replaces build the new map on the side and swap it in under the write
/// lock, so a failing replace leaves the contents untouched.
pub struct MockEventStore {
    events: RwLock<HashMap<String, CanonicalEvent>>,
    fail_writes: AtomicBool,
}

impl MockEventStore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Store pre-filled with `events`
    pub fn with_events(events: impl IntoIterator<Item = CanonicalEvent>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.events.write() {
            map.extend(events.into_iter().map(|e| (e.id.clone(), e)));
        }
        store
    }

    /// Make every subsequent `replace` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sorted(mut events: Vec<CanonicalEvent>) -> Vec<CanonicalEvent> {
        events.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        events
    }
}

impl Default for MockEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MockEventStore {
    fn replace(
        &self,
        scope: &DeleteScope,
        events: &[CanonicalEvent],
    ) -> StoreResult<ReplaceOutcome> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }

        let mut current = self.events.write().map_err(|_| StoreError::Poisoned)?;

        let mut next: HashMap<String, CanonicalEvent> = current
            .iter()
            .filter(|(_, e)| !scope.matches(e))
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        let deleted = current.len() - next.len();

        for event in events {
            next.insert(event.id.clone(), event.clone());
        }

        *current = next;
        Ok(ReplaceOutcome {
            deleted,
            inserted: events.len(),
        })
    }

    fn upcoming(
        &self,
        now: DateTime<Utc>,
        places: Option<&[String]>,
    ) -> StoreResult<Vec<CanonicalEvent>> {
        let events = self.events.read().map_err(|_| StoreError::Poisoned)?;
        let selected = events
            .values()
            .filter(|e| e.start_time > now)
            .filter(|e| match places {
                Some(places) if !places.is_empty() => e
                    .nearest_place
                    .as_ref()
                    .map(|p| places.contains(p))
                    .unwrap_or(false),
                _ => true,
            })
            .cloned()
            .collect();
        Ok(Self::sorted(selected))
    }

    fn count_by_place(&self, now: DateTime<Utc>) -> StoreResult<Vec<PlaceCount>> {
        let events = self.events.read().map_err(|_| StoreError::Poisoned)?;
        let mut counts: HashMap<Option<String>, usize> = HashMap::new();
        for event in events.values().filter(|e| e.start_time > now) {
            *counts.entry(event.nearest_place.clone()).or_default() += 1;
        }
        let mut counts: Vec<PlaceCount> = counts
            .into_iter()
            .map(|(nearest_place, events)| PlaceCount {
                nearest_place,
                events,
            })
            .collect();
        counts.sort_by(|a, b| a.nearest_place.cmp(&b.nearest_place));
        Ok(counts)
    }

    fn get(&self, id: &str) -> StoreResult<Option<CanonicalEvent>> {
        let events = self.events.read().map_err(|_| StoreError::Poisoned)?;
        Ok(events.get(id).cloned())
    }

    fn all(&self) -> StoreResult<Vec<CanonicalEvent>> {
        let events = self.events.read().map_err(|_| StoreError::Poisoned)?;
        Ok(Self::sorted(events.values().cloned().collect()))
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
