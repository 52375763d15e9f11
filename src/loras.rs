use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::db::loras::{LoraRecord, LoraRepoError, LoraStore};
use crate::storage::is_safe_filename;

pub const DEFAULT_LORA_SCALE: f64 = 0.8;
const SAFETENSORS_EXT: &str = "safetensors";

#[derive(Debug, Error)]
pub enum LoraRegistryError {
    #[error("lora '{0}' not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("lora filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] LoraRepoError),
}

/// Catalog of LoRA weight files under one directory, backed by the loras
/// table. Files are validated once at registration; resolve serves cached
/// references and never re-stats the weights file.
#[derive(Debug, Clone)]
pub struct LoraRegistry {
    store: LoraStore,
    loras_dir: PathBuf,
    cache: Arc<Mutex<HashMap<String, LoraRecord>>>,
}

impl LoraRegistry {
    pub fn new(store: LoraStore, loras_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            loras_dir: loras_dir.into(),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn loras_dir(&self) -> &Path {
        self.loras_dir.as_path()
    }

    /// Scans the weights directory and registers every valid `.safetensors`
    /// file. A file already registered keeps its configured scale; new files
    /// get the default. Malformed files are skipped, not fatal.
    pub fn sync_directory(&self) -> Result<Vec<LoraRecord>, LoraRegistryError> {
        fs::create_dir_all(self.loras_dir.as_path())?;
        let mut registered = Vec::new();
        let mut entries: Vec<PathBuf> = fs::read_dir(self.loras_dir.as_path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        for path in entries {
            if !path.is_file() || !has_safetensors_ext(path.as_path()) {
                continue;
            }
            if let Err(error) = validate_safetensors_file(path.as_path()) {
                tracing::warn!(path = %path.display(), %error, "skipping malformed lora file");
                continue;
            }
            let Some(id) = lora_id_for(path.as_path()) else {
                continue;
            };
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| format!("{id}.{SAFETENSORS_EXT}"));
            let size_bytes = fs::metadata(path.as_path())?.len() as i64;
            let scale = self
                .store
                .find(id.as_str())?
                .map(|existing| existing.default_scale)
                .unwrap_or(DEFAULT_LORA_SCALE);
            let record = self.store.upsert(
                id.as_str(),
                filename.as_str(),
                path.to_string_lossy().as_ref(),
                scale,
                size_bytes,
            )?;
            self.remember(&record);
            registered.push(record);
        }
        tracing::info!(count = registered.len(), "synced lora directory");
        Ok(registered)
    }

    /// Validates and stores an uploaded weights file, then registers it.
    pub fn register_upload(
        &self,
        filename: &str,
        bytes: &[u8],
        default_scale: Option<f64>,
    ) -> Result<LoraRecord, LoraRegistryError> {
        if !is_safe_filename(filename) {
            return Err(LoraRegistryError::Validation(format!(
                "unsafe lora filename '{filename}'"
            )));
        }
        if !has_safetensors_ext(Path::new(filename)) {
            return Err(LoraRegistryError::Validation(String::from(
                "only .safetensors uploads are accepted",
            )));
        }
        validate_safetensors_bytes(bytes)?;
        let scale = default_scale.unwrap_or(DEFAULT_LORA_SCALE);
        if !(0.0..=2.0).contains(&scale) {
            return Err(LoraRegistryError::Validation(format!(
                "default_scale {scale} is outside 0.0..=2.0"
            )));
        }
        let Some(id) = lora_id_for(Path::new(filename)) else {
            return Err(LoraRegistryError::Validation(format!(
                "cannot derive a lora id from '{filename}'"
            )));
        };

        fs::create_dir_all(self.loras_dir.as_path())?;
        let path = self.loras_dir.join(filename);
        fs::write(path.as_path(), bytes)?;
        let record = self.store.upsert(
            id.as_str(),
            filename,
            path.to_string_lossy().as_ref(),
            scale,
            bytes.len() as i64,
        )?;
        self.remember(&record);
        Ok(record)
    }

    pub fn resolve(&self, id: &str) -> Result<LoraRecord, LoraRegistryError> {
        if let Some(record) = self
            .cache
            .lock()
            .expect("lora cache mutex poisoned")
            .get(id)
        {
            return Ok(record.clone());
        }
        let record = self
            .store
            .find(id)?
            .ok_or_else(|| LoraRegistryError::NotFound(id.to_string()))?;
        self.remember(&record);
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<LoraRecord>, LoraRegistryError> {
        Ok(self.store.list()?)
    }

    fn remember(&self, record: &LoraRecord) {
        self.cache
            .lock()
            .expect("lora cache mutex poisoned")
            .insert(record.id.clone(), record.clone());
    }
}

fn has_safetensors_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SAFETENSORS_EXT))
}

fn lora_id_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Minimal safetensors shape check: an 8-byte little-endian header length
/// that is nonzero and fits inside the file.
fn validate_safetensors_bytes(bytes: &[u8]) -> Result<(), LoraRegistryError> {
    if bytes.len() < 8 {
        return Err(LoraRegistryError::Validation(String::from(
            "file is too small to hold a safetensors header",
        )));
    }
    let mut header = [0u8; 8];
    header.copy_from_slice(&bytes[..8]);
    let header_len = u64::from_le_bytes(header);
    if header_len == 0 || header_len > (bytes.len() - 8) as u64 {
        return Err(LoraRegistryError::Validation(format!(
            "safetensors header length {header_len} does not fit the file"
        )));
    }
    Ok(())
}

fn validate_safetensors_file(path: &Path) -> Result<(), LoraRegistryError> {
    let size = fs::metadata(path)?.len();
    if size < 8 {
        return Err(LoraRegistryError::Validation(String::from(
            "file is too small to hold a safetensors header",
        )));
    }
    let mut file = fs::File::open(path)?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header)?;
    let header_len = u64::from_le_bytes(header);
    if header_len == 0 || header_len > size - 8 {
        return Err(LoraRegistryError::Validation(format!(
            "safetensors header length {header_len} does not fit the file"
        )));
    }
    Ok(())
}
