//! SQLite-backed gallery store and attendance log.

use chrono::{Local, NaiveDateTime};
use rollcall_core::store::{apply_limit, AttendanceLog, EventQuery, GalleryStore, StoreError};
use rollcall_core::types::{AttendanceEvent, Identity, SampleRef, TIMESTAMP_FORMAT};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Both tables live in one database file behind one connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&conn).map_err(backend)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS employees (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                department TEXT NOT NULL,
                face_image TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS attendance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                employee_id TEXT NOT NULL,
                name TEXT NOT NULL,
                department TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                face_image TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_attendance_employee_time
                ON attendance(employee_id, timestamp);",
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database mutex poisoned".into()))
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        employee_id: row.get(0)?,
        name: row.get(1)?,
        department: row.get(2)?,
        reference_sample: SampleRef(row.get(3)?),
    })
}

impl GalleryStore for SqliteStore {
    fn insert_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        let created_at = Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string();
        self.lock()?
            .execute(
                "INSERT INTO employees (employee_id, name, department, face_image, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    identity.employee_id,
                    identity.name,
                    identity.department,
                    identity.reference_sample.as_str(),
                    created_at
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate(identity.employee_id.clone())
                } else {
                    backend(e)
                }
            })?;
        Ok(())
    }

    fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT employee_id, name, department, face_image FROM employees ORDER BY id")
            .map_err(backend)?;
        let rows = stmt.query_map([], identity_from_row).map_err(backend)?;
        let identities = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)?;
        Ok(identities)
    }

    fn identity(&self, employee_id: &str) -> Result<Option<Identity>, StoreError> {
        self.lock()?
            .query_row(
                "SELECT employee_id, name, department, face_image FROM employees WHERE employee_id = ?1",
                [employee_id],
                identity_from_row,
            )
            .optional()
            .map_err(backend)
    }
}

impl AttendanceLog for SqliteStore {
    fn append(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        self.lock()?
            .execute(
                "INSERT INTO attendance (employee_id, name, department, timestamp, face_image)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.employee_id,
                    event.name,
                    event.department,
                    event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    event.matched_sample.as_str()
                ],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn events(&self, query: &EventQuery) -> Result<Vec<AttendanceEvent>, StoreError> {
        let since = query.since.map(|s| s.format(TIMESTAMP_FORMAT).to_string());
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT employee_id, name, department, timestamp, face_image FROM attendance
                 WHERE (?1 IS NULL OR employee_id = ?1)
                   AND (?2 IS NULL OR timestamp >= ?2)
                 ORDER BY id",
            )
            .map_err(backend)?;

        let rows = stmt
            .query_map(params![query.employee_id, since], |row| {
                let raw: String = row.get(3)?;
                let timestamp = NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(AttendanceEvent {
                    employee_id: row.get(0)?,
                    name: row.get(1)?,
                    department: row.get(2)?,
                    timestamp,
                    matched_sample: SampleRef(row.get(4)?),
                })
            })
            .map_err(backend)?;

        let events = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)?;
        Ok(apply_limit(events, query.limit))
    }
}
