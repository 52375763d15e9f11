pub mod history;
pub mod loras;

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub db_path: PathBuf,
}

impl DbConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

/// Resolves the SQLite file holding history and LoRA tables: the
/// `KONTUR_BACKEND_DB` override wins, otherwise `history.db` under the
/// data root.
pub fn resolve_db_config(data_root: &Path) -> DbConfig {
    let override_path = std::env::var("KONTUR_BACKEND_DB").ok();
    select_db_config(override_path.as_deref(), data_root)
}

fn select_db_config(override_path: Option<&str>, data_root: &Path) -> DbConfig {
    let raw = override_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| String::from("history.db"));
    let candidate = PathBuf::from(raw);
    let absolute = if candidate.is_absolute() {
        candidate
    } else {
        data_root.join(candidate)
    };
    DbConfig::new(absolute)
}
