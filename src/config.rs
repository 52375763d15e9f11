use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::pipeline::gate::DEFAULT_MAX_HOLD;
use crate::pipeline::stage_adapters::StageToolchain;

pub const DEFAULT_BIND: &str = "127.0.0.1:8791";
pub const DEFAULT_DATA_DIR: &str = "var/kontur";
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;
const SETTINGS_REL_PATH: &str = "config/backend.settings.toml";

/// Optional `[tools]`/`[limits]` fields from the TOML overlay or their
/// environment twins.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsOverlay {
    pub synthesis_binary: Option<String>,
    pub filter_binary: Option<String>,
    pub trace_binary: Option<String>,
    pub extract_binary: Option<String>,
    pub synthesis_timeout_secs: Option<u64>,
    pub stage_timeout_secs: Option<u64>,
    pub max_dimension: Option<u32>,
    pub gate_max_hold_secs: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read backend settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse backend settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("backend settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
}

/// Fully resolved runtime settings; env beats file beats default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub bind: String,
    pub data_root: PathBuf,
    pub toolchain: StageToolchain,
    pub max_dimension: u32,
    pub gate_max_hold: Duration,
    pub lora_sync_on_start: bool,
}

impl BackendSettings {
    pub fn outputs_dir(&self) -> PathBuf {
        self.data_root.join("outputs")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.data_root.join("work")
    }

    pub fn loras_dir(&self) -> PathBuf {
        self.data_root.join("loras")
    }
}

pub fn default_app_root() -> PathBuf {
    let fallback = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    fallback.canonicalize().unwrap_or(fallback)
}

pub fn resolve_backend_settings(app_root: &Path) -> Result<BackendSettings, SettingsError> {
    let file_overlay = load_settings_overlay(app_root.join(SETTINGS_REL_PATH).as_path())?;
    let env = gather_env_settings();
    Ok(build_settings(app_root, &env, &file_overlay))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct EnvSettings {
    bind: Option<String>,
    data_dir: Option<String>,
    lora_sync: Option<String>,
    overlay: SettingsOverlay,
}

fn gather_env_settings() -> EnvSettings {
    EnvSettings {
        bind: env_string("KONTUR_BACKEND_BIND"),
        data_dir: env_string("KONTUR_DATA_DIR"),
        lora_sync: env_string("KONTUR_LORA_SYNC"),
        overlay: SettingsOverlay {
            synthesis_binary: env_string("KONTUR_TOOL_SYNTH"),
            filter_binary: env_string("KONTUR_TOOL_FILTER"),
            trace_binary: env_string("KONTUR_TOOL_TRACE"),
            extract_binary: env_string("KONTUR_TOOL_EXTRACT"),
            synthesis_timeout_secs: env_u64("KONTUR_SYNTH_TIMEOUT_SECS"),
            stage_timeout_secs: env_u64("KONTUR_STAGE_TIMEOUT_SECS"),
            max_dimension: env_u64("KONTUR_MAX_DIMENSION").map(|v| v as u32),
            gate_max_hold_secs: env_u64("KONTUR_GATE_MAX_HOLD_SECS"),
        },
    }
}

fn build_settings(app_root: &Path, env: &EnvSettings, file: &SettingsOverlay) -> BackendSettings {
    let overlay = merge_settings_overlays(&env.overlay, file);
    let defaults = StageToolchain::default();

    let data_raw = env
        .data_dir
        .clone()
        .unwrap_or_else(|| String::from(DEFAULT_DATA_DIR));
    let data_candidate = PathBuf::from(data_raw);
    let data_root = if data_candidate.is_absolute() {
        data_candidate
    } else {
        app_root.join(data_candidate)
    };

    let stage_timeout = overlay
        .stage_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.filter_timeout);

    BackendSettings {
        bind: env
            .bind
            .clone()
            .unwrap_or_else(|| String::from(DEFAULT_BIND)),
        data_root,
        toolchain: StageToolchain {
            synthesis_binary: overlay
                .synthesis_binary
                .unwrap_or(defaults.synthesis_binary),
            filter_binary: overlay.filter_binary.unwrap_or(defaults.filter_binary),
            trace_binary: overlay.trace_binary.unwrap_or(defaults.trace_binary),
            extract_binary: overlay.extract_binary.unwrap_or(defaults.extract_binary),
            synthesis_timeout: overlay
                .synthesis_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.synthesis_timeout),
            filter_timeout: stage_timeout,
            trace_timeout: stage_timeout,
            extract_timeout: stage_timeout,
        },
        max_dimension: overlay.max_dimension.unwrap_or(DEFAULT_MAX_DIMENSION),
        gate_max_hold: overlay
            .gate_max_hold_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MAX_HOLD),
        lora_sync_on_start: env
            .lora_sync
            .as_deref()
            .map(parse_truthy)
            .unwrap_or(true),
    }
}

pub fn merge_settings_overlays(
    overrides: &SettingsOverlay,
    base: &SettingsOverlay,
) -> SettingsOverlay {
    SettingsOverlay {
        synthesis_binary: choose_string(
            overrides.synthesis_binary.as_deref(),
            base.synthesis_binary.as_deref(),
        ),
        filter_binary: choose_string(
            overrides.filter_binary.as_deref(),
            base.filter_binary.as_deref(),
        ),
        trace_binary: choose_string(
            overrides.trace_binary.as_deref(),
            base.trace_binary.as_deref(),
        ),
        extract_binary: choose_string(
            overrides.extract_binary.as_deref(),
            base.extract_binary.as_deref(),
        ),
        synthesis_timeout_secs: overrides
            .synthesis_timeout_secs
            .or(base.synthesis_timeout_secs),
        stage_timeout_secs: overrides.stage_timeout_secs.or(base.stage_timeout_secs),
        max_dimension: overrides.max_dimension.or(base.max_dimension),
        gate_max_hold_secs: overrides.gate_max_hold_secs.or(base.gate_max_hold_secs),
    }
}

pub fn load_settings_overlay(path: &Path) -> Result<SettingsOverlay, SettingsError> {
    if !path.exists() {
        return Ok(SettingsOverlay::default());
    }
    let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed = toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| {
        SettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    let json_value = serde_json::to_value(parsed).map_err(|error| SettingsError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parse_settings_overlay(&json_value)
}

fn parse_settings_overlay(value: &Value) -> Result<SettingsOverlay, SettingsError> {
    let mut out = SettingsOverlay::default();
    let Some(root) = value.as_object() else {
        return Ok(out);
    };

    if let Some(tools) = root.get("tools") {
        let tools = tools
            .as_object()
            .ok_or_else(|| SettingsError::InvalidFieldType {
                field: String::from("tools"),
            })?;
        if let Some(v) = tools.get("synth") {
            out.synthesis_binary = Some(parse_string(v, "tools.synth")?);
        }
        if let Some(v) = tools.get("filter") {
            out.filter_binary = Some(parse_string(v, "tools.filter")?);
        }
        if let Some(v) = tools.get("trace") {
            out.trace_binary = Some(parse_string(v, "tools.trace")?);
        }
        if let Some(v) = tools.get("extract") {
            out.extract_binary = Some(parse_string(v, "tools.extract")?);
        }
        if let Some(v) = tools.get("synth_timeout_secs") {
            out.synthesis_timeout_secs = Some(parse_u64(v, "tools.synth_timeout_secs")?);
        }
        if let Some(v) = tools.get("stage_timeout_secs") {
            out.stage_timeout_secs = Some(parse_u64(v, "tools.stage_timeout_secs")?);
        }
    }

    if let Some(limits) = root.get("limits") {
        let limits = limits
            .as_object()
            .ok_or_else(|| SettingsError::InvalidFieldType {
                field: String::from("limits"),
            })?;
        if let Some(v) = limits.get("max_dimension") {
            out.max_dimension = Some(parse_u64(v, "limits.max_dimension")? as u32);
        }
        if let Some(v) = limits.get("gate_max_hold_secs") {
            out.gate_max_hold_secs = Some(parse_u64(v, "limits.gate_max_hold_secs")?);
        }
    }
    Ok(out)
}

pub fn parse_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn choose_string(a: Option<&str>, b: Option<&str>) -> Option<String> {
    a.or(b).map(str::to_string)
}

fn parse_string(value: &Value, field: &str) -> Result<String, SettingsError> {
    let parsed = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })?;
    if parsed.is_empty() {
        return Err(SettingsError::InvalidFieldType {
            field: field.to_string(),
        });
    }
    Ok(parsed.to_string())
}

fn parse_u64(value: &Value, field: &str) -> Result<u64, SettingsError> {
    value
        .as_u64()
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_temp_settings(contents: &str) -> PathBuf {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("kontur_settings_{stamp}.toml"));
        fs::write(&path, contents).expect("settings file should write");
        path
    }

    #[test]
    fn defaults_apply_without_env_or_file() {
        let settings = build_settings(
            Path::new("/srv/app"),
            &EnvSettings::default(),
            &SettingsOverlay::default(),
        );
        assert_eq!(settings.bind, DEFAULT_BIND);
        assert_eq!(settings.data_root, PathBuf::from("/srv/app/var/kontur"));
        assert_eq!(settings.toolchain.synthesis_binary, "kontur-synth");
        assert_eq!(settings.toolchain.synthesis_timeout, Duration::from_secs(600));
        assert_eq!(settings.toolchain.trace_timeout, Duration::from_secs(120));
        assert_eq!(settings.max_dimension, DEFAULT_MAX_DIMENSION);
        assert!(settings.lora_sync_on_start);
        assert_eq!(settings.outputs_dir(), PathBuf::from("/srv/app/var/kontur/outputs"));
    }

    #[test]
    fn env_beats_file_beats_default() {
        let env = EnvSettings {
            bind: Some(String::from("0.0.0.0:9000")),
            data_dir: Some(String::from("/data/kontur")),
            lora_sync: Some(String::from("off")),
            overlay: SettingsOverlay {
                synthesis_binary: Some(String::from("env-synth")),
                ..SettingsOverlay::default()
            },
        };
        let file = SettingsOverlay {
            synthesis_binary: Some(String::from("file-synth")),
            stage_timeout_secs: Some(45),
            max_dimension: Some(4096),
            ..SettingsOverlay::default()
        };

        let settings = build_settings(Path::new("/srv/app"), &env, &file);

        assert_eq!(settings.bind, "0.0.0.0:9000");
        assert_eq!(settings.data_root, PathBuf::from("/data/kontur"));
        assert_eq!(settings.toolchain.synthesis_binary, "env-synth");
        assert_eq!(settings.toolchain.filter_timeout, Duration::from_secs(45));
        assert_eq!(settings.toolchain.extract_timeout, Duration::from_secs(45));
        assert_eq!(settings.max_dimension, 4096);
        assert!(!settings.lora_sync_on_start);
    }

    #[test]
    fn overlay_parses_tools_and_limits_tables() {
        let path = write_temp_settings(
            "
            [tools]
            synth = \"zimage\"
            stage_timeout_secs = 30

            [limits]
            max_dimension = 1536
            gate_max_hold_secs = 700
            ",
        );
        let overlay = load_settings_overlay(path.as_path()).expect("overlay should parse");
        assert_eq!(overlay.synthesis_binary.as_deref(), Some("zimage"));
        assert_eq!(overlay.stage_timeout_secs, Some(30));
        assert_eq!(overlay.max_dimension, Some(1536));
        assert_eq!(overlay.gate_max_hold_secs, Some(700));
        assert_eq!(overlay.filter_binary, None);
    }

    #[test]
    fn missing_overlay_file_is_default() {
        let overlay = load_settings_overlay(Path::new("/definitely/not/here.toml"))
            .expect("missing file is fine");
        assert_eq!(overlay, SettingsOverlay::default());
    }

    #[test]
    fn wrong_field_types_are_rejected() {
        let path = write_temp_settings("[tools]\nsynth = 42\n");
        let error = load_settings_overlay(path.as_path()).expect_err("should reject");
        assert_eq!(
            error,
            SettingsError::InvalidFieldType {
                field: String::from("tools.synth"),
            }
        );
    }

    #[test]
    fn truthy_parsing_accepts_the_usual_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_truthy(value), "{value} should be truthy");
        }
        for value in ["0", "false", "off", "", "2"] {
            assert!(!parse_truthy(value), "{value} should be falsy");
        }
    }
}
