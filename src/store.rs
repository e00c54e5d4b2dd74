// 🗄️ Catalog Store - SQLite persistence for catalogued records
//
// The store is an explicit handle: callers open it, pass it down, and take
// scoped sessions from it. A session is one SQLite transaction; dropping it
// without `commit` rolls everything back.
//
// Table layout is generated from the entity profiles, so the engine and the
// schema can never disagree about column names.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{ToSqlOutput, Type};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::entities::{EntityKind, EntityProfile, FieldType, FieldValue, DEFAULT_COUNT};
use crate::error::Result;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.f";

// ============================================================================
// RECORDS
// ============================================================================

/// One catalogued record as it currently exists in the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    /// Surrogate row id
    pub id: i64,

    /// Natural key (accession number, USN)
    pub key: String,

    /// Every non-key field of the profile
    pub values: BTreeMap<&'static str, FieldValue>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Text value of a field, "" if absent or not text
    pub fn text(&self, field: &str) -> &str {
        self.get(field).and_then(FieldValue::as_text).unwrap_or_default()
    }

    /// Count value of a field, `DEFAULT_COUNT` if absent or not a count
    pub fn count(&self, field: &str) -> i64 {
        self.get(field)
            .and_then(FieldValue::as_count)
            .unwrap_or(DEFAULT_COUNT)
    }
}

/// Audit entry for one committed import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub run_id: String,
    pub kind: EntityKind,
    pub source_path: String,
    pub source_sha256: String,

    /// Resolved column map (logical field -> header), as JSON
    pub columns: serde_json::Value,

    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            FieldValue::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            FieldValue::Count(n) => Ok(ToSqlOutput::from(*n)),
        }
    }
}

/// RFC 3339 as written by this crate, or SQLite's `CURRENT_TIMESTAMP` form
/// (`YYYY-MM-DD HH:MM:SS`, UTC) as written by other tools.
fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, SQLITE_TIMESTAMP).map(|naive| naive.and_utc())
        })
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// RECORD STORE SEAM
// ============================================================================

/// What the reconciliation engine needs from a store: key existence, insert,
/// and field-level update.
///
/// Implementations must read their own writes: `exists` after an `insert` in
/// the same session sees the inserted key.
pub trait RecordStore {
    /// Whether a record with this exact natural key is stored. Reads nothing
    /// else, so rows touched by other writers never fail the lookup.
    fn exists(&self, profile: &EntityProfile, key: &str) -> Result<bool>;

    /// Insert a new record. `values` should hold every non-key field; missing
    /// ones are stored as their type's default.
    fn insert(
        &self,
        profile: &EntityProfile,
        key: &str,
        values: &BTreeMap<&'static str, FieldValue>,
    ) -> Result<()>;

    /// Overwrite exactly the given fields of an existing record.
    /// Returns the number of rows changed (0 if the key is unknown).
    fn update(
        &self,
        profile: &EntityProfile,
        key: &str,
        values: &BTreeMap<&'static str, FieldValue>,
    ) -> Result<usize>;
}

// ============================================================================
// SQL HELPERS (shared by the store and its sessions)
// ============================================================================

fn select_sql(profile: &EntityProfile) -> String {
    let columns: Vec<&str> = profile.fields.iter().map(|f| f.name).collect();
    format!(
        "SELECT id, {key}, {cols}, created_at, updated_at FROM {table}",
        key = profile.key.name,
        cols = columns.join(", "),
        table = profile.table,
    )
}

fn record_from_row(profile: &EntityProfile, row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let mut values = BTreeMap::new();
    for (i, field) in profile.fields.iter().enumerate() {
        let idx = i + 2;
        // NULLs can come from writers other than the importer
        let value = match field.field_type {
            FieldType::Text => {
                FieldValue::Text(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
            }
            FieldType::Count => {
                FieldValue::Count(row.get::<_, Option<i64>>(idx)?.unwrap_or(DEFAULT_COUNT))
            }
        };
        values.insert(field.name, value);
    }

    let ts_idx = profile.fields.len() + 2;
    let created_at: String = row.get(ts_idx)?;
    let updated_at: String = row.get(ts_idx + 1)?;

    Ok(StoredRecord {
        id: row.get(0)?,
        key: row.get(1)?,
        values,
        created_at: parse_timestamp(ts_idx, &created_at)?,
        updated_at: parse_timestamp(ts_idx + 1, &updated_at)?,
    })
}

fn find_record(conn: &Connection, profile: &EntityProfile, key: &str) -> Result<Option<StoredRecord>> {
    let sql = format!("{} WHERE {} = ?1", select_sql(profile), profile.key.name);
    let mut stmt = conn.prepare_cached(&sql)?;
    let record = stmt
        .query_row([key], |row| record_from_row(profile, row))
        .optional()?;
    Ok(record)
}

fn record_exists(conn: &Connection, profile: &EntityProfile, key: &str) -> Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE {} = ?1", profile.table, profile.key.name);
    let found = conn
        .prepare_cached(&sql)?
        .query_row([key], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn insert_record(
    conn: &Connection,
    profile: &EntityProfile,
    key: &str,
    values: &BTreeMap<&'static str, FieldValue>,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    let defaults: Vec<FieldValue> = profile
        .fields
        .iter()
        .map(|f| FieldValue::default_for(f.field_type))
        .collect();

    let mut columns = vec![profile.key.name];
    let mut params: Vec<&dyn ToSql> = vec![&key];
    for (field, default) in profile.fields.iter().zip(&defaults) {
        columns.push(field.name);
        params.push(values.get(field.name).unwrap_or(default));
    }
    columns.push("created_at");
    params.push(&now);
    columns.push("updated_at");
    params.push(&now);

    let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        profile.table,
        columns.join(", "),
        placeholders.join(", "),
    );

    conn.prepare_cached(&sql)?.execute(params.as_slice())?;
    Ok(())
}

fn update_record(
    conn: &Connection,
    profile: &EntityProfile,
    key: &str,
    values: &BTreeMap<&'static str, FieldValue>,
) -> Result<usize> {
    let now = Utc::now().to_rfc3339();

    let mut assignments = Vec::with_capacity(values.len() + 1);
    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(values.len() + 2);
    for (name, value) in values {
        params.push(value);
        assignments.push(format!("{} = ?{}", name, params.len()));
    }
    params.push(&now);
    assignments.push(format!("updated_at = ?{}", params.len()));
    params.push(&key);

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        profile.table,
        assignments.join(", "),
        profile.key.name,
        params.len(),
    );

    let changed = conn.prepare_cached(&sql)?.execute(params.as_slice())?;
    Ok(changed)
}

fn create_table_sql(profile: &EntityProfile) -> String {
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        format!("{} TEXT UNIQUE NOT NULL", profile.key.name),
    ];
    for field in profile.fields {
        columns.push(match field.field_type {
            FieldType::Text => format!("{} TEXT NOT NULL DEFAULT ''", field.name),
            FieldType::Count => {
                format!("{} INTEGER NOT NULL DEFAULT {}", field.name, DEFAULT_COUNT)
            }
        });
    }
    columns.push("created_at TEXT NOT NULL".to_string());
    columns.push("updated_at TEXT NOT NULL".to_string());

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        profile.table,
        columns.join(",\n    ")
    )
}

// ============================================================================
// CATALOG STORE
// ============================================================================

/// Handle over one SQLite database holding every entity kind's table
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    /// Open the database named by a `DATABASE_URL`-style string:
    /// `sqlite://path`, `sqlite:path`, a plain path, or `:memory:`.
    pub fn open(url: &str) -> Result<Self> {
        let target = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);

        if target == ":memory:" {
            return Self::open_in_memory();
        }

        Self::open_path(Path::new(target))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "opening catalog store");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection and make sure every table exists.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        let store = CatalogStore { conn };
        store.setup()?;
        Ok(store)
    }

    fn setup(&self) -> Result<()> {
        // WAL so a reader left open elsewhere does not block the import
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;

        for kind in EntityKind::ALL {
            self.conn.execute(&create_table_sql(kind.profile()), [])?;
        }

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS import_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT UNIQUE NOT NULL,
                entity_kind TEXT NOT NULL,
                source_path TEXT NOT NULL,
                source_sha256 TEXT NOT NULL,
                columns TEXT NOT NULL,
                created_count INTEGER NOT NULL,
                updated_count INTEGER NOT NULL,
                skipped_count INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_import_runs_kind ON import_runs(entity_kind, finished_at)",
            [],
        )?;

        Ok(())
    }

    /// Begin a unit of work. Rolls back on drop unless committed.
    pub fn session(&mut self) -> Result<StoreSession<'_>> {
        let tx = self.conn.transaction()?;
        Ok(StoreSession { tx })
    }

    /// Raw connection, for read-only inspection and test fixtures
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn find(&self, profile: &EntityProfile, key: &str) -> Result<Option<StoredRecord>> {
        find_record(&self.conn, profile, key)
    }

    pub fn count(&self, profile: &EntityProfile) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", profile.table);
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Every record of a kind, ordered by natural key
    pub fn list(&self, profile: &EntityProfile) -> Result<Vec<StoredRecord>> {
        let sql = format!("{} ORDER BY {}", select_sql(profile), profile.key.name);
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map([], |row| record_from_row(profile, row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Most recent committed runs, newest first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ImportRun>> {
        let sql = format!("{} ORDER BY finished_at DESC, id DESC LIMIT ?1", SELECT_RUNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Last committed run of one entity kind
    pub fn latest_run(&self, kind: EntityKind) -> Result<Option<ImportRun>> {
        let sql = format!(
            "{} WHERE entity_kind = ?1 ORDER BY finished_at DESC, id DESC LIMIT 1",
            SELECT_RUNS
        );
        let run = self
            .conn
            .query_row(&sql, [kind_column(kind)], run_from_row)
            .optional()?;
        Ok(run)
    }
}

const SELECT_RUNS: &str = "SELECT run_id, entity_kind, source_path, source_sha256, columns,
        created_count, updated_count, skipped_count, started_at, finished_at
 FROM import_runs";

/// `entity_kind` column value, matching the kind's serde name
fn kind_column(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Holding => "holding",
        EntityKind::Individual => "individual",
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<ImportRun> {
    let kind: String = row.get(1)?;
    let columns: String = row.get(4)?;
    let started_at: String = row.get(8)?;
    let finished_at: String = row.get(9)?;

    Ok(ImportRun {
        run_id: row.get(0)?,
        kind: serde_json::from_value(serde_json::Value::String(kind))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
        source_path: row.get(2)?,
        source_sha256: row.get(3)?,
        columns: serde_json::from_str(&columns)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        created: row.get::<_, i64>(5)? as usize,
        updated: row.get::<_, i64>(6)? as usize,
        skipped: row.get::<_, i64>(7)? as usize,
        started_at: parse_timestamp(8, &started_at)?,
        finished_at: parse_timestamp(9, &finished_at)?,
    })
}

// ============================================================================
// STORE SESSION (unit of work)
// ============================================================================

/// One open transaction against the catalog store
pub struct StoreSession<'conn> {
    tx: Transaction<'conn>,
}

impl StoreSession<'_> {
    /// Write the audit entry for this run. Part of the same unit of work, so a
    /// rollback erases it too.
    pub fn record_run(&self, run: &ImportRun) -> Result<()> {
        let columns = serde_json::to_string(&run.columns)?;

        self.tx.execute(
            "INSERT INTO import_runs (
                run_id, entity_kind, source_path, source_sha256, columns,
                created_count, updated_count, skipped_count, started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.run_id,
                kind_column(run.kind),
                run.source_path,
                run.source_sha256,
                columns,
                run.created as i64,
                run.updated as i64,
                run.skipped as i64,
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }

    /// Full record as seen by this unit of work
    pub fn find(&self, profile: &EntityProfile, key: &str) -> Result<Option<StoredRecord>> {
        find_record(&self.tx, profile, key)
    }
}

impl RecordStore for StoreSession<'_> {
    fn exists(&self, profile: &EntityProfile, key: &str) -> Result<bool> {
        record_exists(&self.tx, profile, key)
    }

    fn insert(
        &self,
        profile: &EntityProfile,
        key: &str,
        values: &BTreeMap<&'static str, FieldValue>,
    ) -> Result<()> {
        insert_record(&self.tx, profile, key, values)
    }

    fn update(
        &self,
        profile: &EntityProfile,
        key: &str,
        values: &BTreeMap<&'static str, FieldValue>,
    ) -> Result<usize> {
        update_record(&self.tx, profile, key, values)
    }
}
