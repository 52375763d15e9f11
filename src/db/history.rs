use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub run_id: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<String>,
    pub svg_preset: Option<String>,
    pub lora_id: Option<String>,
    pub lora_scale: Option<f64>,
    pub status: String,
    pub failure_stage: Option<String>,
    pub failure_kind: Option<String>,
    pub outputs: Value,
    pub durations: Value,
    pub duration_ms: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryRecord {
    pub run_id: Uuid,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<String>,
    pub svg_preset: Option<String>,
    pub lora_id: Option<String>,
    pub lora_scale: Option<f64>,
    pub status: String,
    pub failure_stage: Option<String>,
    pub failure_kind: Option<String>,
    pub outputs: Value,
    pub durations: Value,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Error)]
pub enum HistoryRepoError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Append-only record of finished runs. Rows are never updated or deleted;
/// listing is most-recent-first.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
}

impl HistoryStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn initialize(&self) -> Result<(), HistoryRepoError> {
        self.with_connection(|_| Ok(()))
    }

    fn with_connection<T, F>(&self, func: F) -> Result<T, HistoryRepoError>
    where
        F: FnOnce(&Connection) -> Result<T, HistoryRepoError>,
    {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(self.db_path.as_path())?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        ensure_schema(&conn)?;
        func(&conn)
    }

    pub fn append(&self, record: &NewHistoryRecord) -> Result<HistoryRecord, HistoryRepoError> {
        self.with_connection(|conn| {
            let created_at = Utc::now().to_rfc3339();
            conn.execute(
                "
                INSERT INTO history_records (
                  run_id, prompt, negative_prompt, model, width, height, steps,
                  seed, svg_preset, lora_id, lora_scale, status, failure_stage,
                  failure_kind, outputs, durations, duration_ms, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                ",
                params![
                    record.run_id.to_string(),
                    record.prompt,
                    record.negative_prompt,
                    record.model,
                    record.width,
                    record.height,
                    record.steps,
                    record.seed,
                    record.svg_preset,
                    record.lora_id,
                    record.lora_scale,
                    record.status,
                    record.failure_stage,
                    record.failure_kind,
                    record.outputs.to_string(),
                    record.durations.to_string(),
                    record.duration_ms,
                    created_at,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(HistoryRecord {
                id,
                run_id: record.run_id.to_string(),
                prompt: record.prompt.clone(),
                negative_prompt: record.negative_prompt.clone(),
                model: record.model.clone(),
                width: record.width,
                height: record.height,
                steps: record.steps,
                seed: record.seed.clone(),
                svg_preset: record.svg_preset.clone(),
                lora_id: record.lora_id.clone(),
                lora_scale: record.lora_scale,
                status: record.status.clone(),
                failure_stage: record.failure_stage.clone(),
                failure_kind: record.failure_kind.clone(),
                outputs: record.outputs.clone(),
                durations: record.durations.clone(),
                duration_ms: record.duration_ms,
                created_at,
            })
        })
    }

    pub fn list(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>, HistoryRepoError> {
        self.with_connection(|conn| {
            let limit = query
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .min(MAX_LIST_LIMIT);
            let offset = query.offset.unwrap_or(0);
            let search = query
                .search
                .as_deref()
                .map(str::trim)
                .filter(|term| !term.is_empty());

            let mut out = Vec::new();
            if let Some(term) = search {
                let pattern = format!("%{}%", escape_like(term));
                let mut stmt = conn.prepare(
                    "
                    SELECT * FROM history_records
                    WHERE prompt LIKE ?1 ESCAPE '\\'
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?2 OFFSET ?3
                    ",
                )?;
                let mut rows = stmt.query(params![pattern, limit, offset])?;
                while let Some(row) = rows.next()? {
                    out.push(record_from_row(row)?);
                }
            } else {
                let mut stmt = conn.prepare(
                    "
                    SELECT * FROM history_records
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?1 OFFSET ?2
                    ",
                )?;
                let mut rows = stmt.query(params![limit, offset])?;
                while let Some(row) = rows.next()? {
                    out.push(record_from_row(row)?);
                }
            }
            Ok(out)
        })
    }

    pub fn find_by_run_id(
        &self,
        run_id: Uuid,
    ) -> Result<Option<HistoryRecord>, HistoryRepoError> {
        self.with_connection(|conn| {
            conn.prepare("SELECT * FROM history_records WHERE run_id = ?1")?
                .query_row(params![run_id.to_string()], record_from_row)
                .optional()
                .map_err(HistoryRepoError::Sqlite)
        })
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> Result<HistoryRecord, rusqlite::Error> {
    let outputs_raw: String = row.get("outputs")?;
    let durations_raw: String = row.get("durations")?;
    Ok(HistoryRecord {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        prompt: row.get("prompt")?,
        negative_prompt: row.get("negative_prompt")?,
        model: row.get("model")?,
        width: row.get("width")?,
        height: row.get("height")?,
        steps: row.get("steps")?,
        seed: row.get("seed")?,
        svg_preset: row.get("svg_preset")?,
        lora_id: row.get("lora_id")?,
        lora_scale: row.get("lora_scale")?,
        status: row.get("status")?,
        failure_stage: row.get("failure_stage")?,
        failure_kind: row.get("failure_kind")?,
        outputs: serde_json::from_str(outputs_raw.as_str()).unwrap_or(Value::Null),
        durations: serde_json::from_str(durations_raw.as_str()).unwrap_or(Value::Null),
        duration_ms: row.get("duration_ms")?,
        created_at: row.get("created_at")?,
    })
}

fn ensure_schema(conn: &Connection) -> Result<(), HistoryRepoError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS history_records (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          run_id TEXT NOT NULL UNIQUE,
          prompt TEXT NOT NULL,
          negative_prompt TEXT,
          model TEXT NOT NULL,
          width INTEGER NOT NULL,
          height INTEGER NOT NULL,
          steps INTEGER NOT NULL,
          seed TEXT,
          svg_preset TEXT,
          lora_id TEXT,
          lora_scale REAL,
          status TEXT NOT NULL,
          failure_stage TEXT,
          failure_kind TEXT,
          outputs TEXT NOT NULL,
          durations TEXT NOT NULL,
          duration_ms INTEGER NOT NULL,
          created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_history_created_at
          ON history_records(created_at DESC);
        ",
    )?;
    Ok(())
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
