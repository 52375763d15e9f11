use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoraRecord {
    pub id: String,
    pub filename: String,
    pub path: String,
    pub default_scale: f64,
    pub size_bytes: i64,
    pub registered_at: String,
}

#[derive(Debug, Error)]
pub enum LoraRepoError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct LoraStore {
    db_path: PathBuf,
}

impl LoraStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn initialize(&self) -> Result<(), LoraRepoError> {
        self.with_connection(|_| Ok(()))
    }

    fn with_connection<T, F>(&self, func: F) -> Result<T, LoraRepoError>
    where
        F: FnOnce(&Connection) -> Result<T, LoraRepoError>,
    {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(self.db_path.as_path())?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        ensure_schema(&conn)?;
        func(&conn)
    }

    /// Inserts or refreshes one weights file entry, keeping the original
    /// registration timestamp on refresh.
    pub fn upsert(
        &self,
        id: &str,
        filename: &str,
        path: &str,
        default_scale: f64,
        size_bytes: i64,
    ) -> Result<LoraRecord, LoraRepoError> {
        self.with_connection(|conn| {
            let registered_at = Utc::now().to_rfc3339();
            conn.execute(
                "
                INSERT INTO loras (id, filename, path, default_scale, size_bytes, registered_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                  filename = excluded.filename,
                  path = excluded.path,
                  default_scale = excluded.default_scale,
                  size_bytes = excluded.size_bytes
                ",
                params![id, filename, path, default_scale, size_bytes, registered_at],
            )?;
            conn.prepare("SELECT * FROM loras WHERE id = ?1")?
                .query_row(params![id], record_from_row)
                .map_err(LoraRepoError::Sqlite)
        })
    }

    pub fn list(&self) -> Result<Vec<LoraRecord>, LoraRepoError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM loras ORDER BY id ASC")?;
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(record_from_row(row)?);
            }
            Ok(out)
        })
    }

    pub fn find(&self, id: &str) -> Result<Option<LoraRecord>, LoraRepoError> {
        self.with_connection(|conn| {
            conn.prepare("SELECT * FROM loras WHERE id = ?1")?
                .query_row(params![id], record_from_row)
                .optional()
                .map_err(LoraRepoError::Sqlite)
        })
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> Result<LoraRecord, rusqlite::Error> {
    Ok(LoraRecord {
        id: row.get("id")?,
        filename: row.get("filename")?,
        path: row.get("path")?,
        default_scale: row.get("default_scale")?,
        size_bytes: row.get("size_bytes")?,
        registered_at: row.get("registered_at")?,
    })
}

fn ensure_schema(conn: &Connection) -> Result<(), LoraRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS loras (
          id TEXT PRIMARY KEY,
          filename TEXT NOT NULL,
          path TEXT NOT NULL,
          default_scale REAL NOT NULL,
          size_bytes INTEGER NOT NULL,
          registered_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}
