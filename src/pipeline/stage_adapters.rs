use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::runtime::{
    CommandSpec, PipelineCommandRunner, PipelineRuntimeError, StdPipelineCommandRunner,
};
use crate::pipeline::{ContentKind, FailureKind, StageArtifact};

const DIAGNOSTIC_TAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seed: Option<i64>,
    pub face_reference: Option<PathBuf>,
    pub reference_strength: Option<f32>,
    pub lora: Option<PathBuf>,
    pub lora_scale: Option<f32>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SynthesisReport {
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub contrast: Option<f32>,
    pub brightness: Option<f32>,
    pub saturation: Option<f32>,
    pub sharpen: bool,
    pub posterize: Option<u8>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FilterReport {
    #[serde(default)]
    pub applied: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub color_mode: String,
    pub simplify: f32,
    pub corner_smoothing: f32,
    pub max_paths: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TraceReport {
    #[serde(default)]
    pub path_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractKind {
    Edge,
    Depth,
    Saliency,
}

impl ExtractKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Depth => "depth",
            Self::Saliency => "saliency",
        }
    }

    pub fn stage_label(self) -> &'static str {
        match self {
            Self::Edge => "extract_edge",
            Self::Depth => "extract_depth",
            Self::Saliency => "extract_saliency",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub kind: ExtractKind,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractReport {
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub artifact: StageArtifact,
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceOutcome {
    pub artifact: StageArtifact,
    pub path_count: Option<u32>,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid stage input: {0}")]
    InvalidInput(String),
    #[error("stage tool '{tool}' failed: {message}")]
    ToolFailure {
        tool: &'static str,
        exit_code: Option<i32>,
        message: String,
    },
    #[error("stage tool '{tool}' exceeded its {timeout_secs}s deadline")]
    Timeout { tool: &'static str, timeout_secs: u64 },
}

impl StageError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::InvalidInput(_) => FailureKind::InvalidInput,
            Self::ToolFailure { .. } => FailureKind::ToolFailure,
            Self::Timeout { .. } => FailureKind::Timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// One blocking call per pipeline stage. Implementations never retry; the
/// orchestrator owns retry policy.
pub trait StageAdapterOps: Send + Sync + 'static {
    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutcome, StageError>;
    fn filter(&self, request: &FilterRequest) -> Result<StageArtifact, StageError>;
    fn trace(&self, request: &TraceRequest) -> Result<TraceOutcome, StageError>;
    fn extract(&self, request: &ExtractRequest) -> Result<StageArtifact, StageError>;
}

pub type SharedStageAdapterOps = Arc<dyn StageAdapterOps>;

/// Binaries and per-stage deadlines for the external toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageToolchain {
    pub synthesis_binary: String,
    pub filter_binary: String,
    pub trace_binary: String,
    pub extract_binary: String,
    pub synthesis_timeout: Duration,
    pub filter_timeout: Duration,
    pub trace_timeout: Duration,
    pub extract_timeout: Duration,
}

impl Default for StageToolchain {
    fn default() -> Self {
        Self {
            synthesis_binary: String::from("kontur-synth"),
            filter_binary: String::from("kontur-filter"),
            trace_binary: String::from("kontur-trace"),
            extract_binary: String::from("kontur-extract"),
            synthesis_timeout: Duration::from_secs(600),
            filter_timeout: Duration::from_secs(120),
            trace_timeout: Duration::from_secs(120),
            extract_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolStageAdapters<R> {
    runner: R,
    toolchain: StageToolchain,
}

pub fn default_tool_stage_adapters() -> ToolStageAdapters<StdPipelineCommandRunner> {
    ToolStageAdapters::new(StageToolchain::default(), StdPipelineCommandRunner)
}

impl<R> ToolStageAdapters<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(toolchain: StageToolchain, runner: R) -> Self {
        Self { runner, toolchain }
    }

    pub fn build_synthesis_command(
        &self,
        request: &SynthesisRequest,
    ) -> Result<CommandSpec, StageError> {
        if request.prompt.trim().is_empty() {
            return Err(StageError::InvalidInput(String::from(
                "synthesis prompt is empty",
            )));
        }
        if let Some(reference) = request.face_reference.as_ref() {
            require_input_file(reference, "face reference")?;
        }
        if let Some(lora) = request.lora.as_ref() {
            require_input_file(lora, "lora weights")?;
        }

        let mut args = vec![String::from("-p"), request.prompt.clone()];
        if let Some(negative) = request.negative_prompt.as_ref() {
            args.push(String::from("--negative-prompt"));
            args.push(negative.clone());
        }
        args.push(String::from("-W"));
        args.push(request.width.to_string());
        args.push(String::from("-H"));
        args.push(request.height.to_string());
        args.push(String::from("-s"));
        args.push(request.steps.to_string());
        args.push(String::from("--model"));
        args.push(request.model.clone());
        if let Some(seed) = request.seed {
            args.push(String::from("--seed"));
            args.push(seed.to_string());
        }
        if let Some(reference) = request.face_reference.as_ref() {
            args.push(String::from("--face-ref"));
            args.push(reference.to_string_lossy().to_string());
        }
        if let Some(strength) = request.reference_strength {
            args.push(String::from("--ref-strength"));
            args.push(strength.to_string());
        }
        if let Some(lora) = request.lora.as_ref() {
            args.push(String::from("--lora"));
            args.push(lora.to_string_lossy().to_string());
        }
        if let Some(scale) = request.lora_scale {
            args.push(String::from("--lora-scale"));
            args.push(scale.to_string());
        }
        args.push(String::from("-o"));
        args.push(request.output_path.to_string_lossy().to_string());
        args.push(String::from("--no-progress"));
        args.push(String::from("--json"));
        Ok(CommandSpec {
            program: self.toolchain.synthesis_binary.clone(),
            args,
            cwd: working_dir_for(request.output_path.as_path()),
            timeout: self.toolchain.synthesis_timeout,
        })
    }

    pub fn build_filter_command(&self, request: &FilterRequest) -> Result<CommandSpec, StageError> {
        require_input_file(request.input_path.as_path(), "filter input")?;
        let mut args = vec![
            String::from("--input"),
            request.input_path.to_string_lossy().to_string(),
            String::from("--output"),
            request.output_path.to_string_lossy().to_string(),
        ];
        if let Some(contrast) = request.contrast {
            args.push(String::from("--contrast"));
            args.push(contrast.to_string());
        }
        if let Some(brightness) = request.brightness {
            args.push(String::from("--brightness"));
            args.push(brightness.to_string());
        }
        if let Some(saturation) = request.saturation {
            args.push(String::from("--saturation"));
            args.push(saturation.to_string());
        }
        if request.sharpen {
            args.push(String::from("--sharpen"));
        }
        if let Some(levels) = request.posterize {
            args.push(String::from("--posterize"));
            args.push(levels.to_string());
        }
        args.push(String::from("--json"));
        Ok(CommandSpec {
            program: self.toolchain.filter_binary.clone(),
            args,
            cwd: working_dir_for(request.output_path.as_path()),
            timeout: self.toolchain.filter_timeout,
        })
    }

    pub fn build_trace_command(&self, request: &TraceRequest) -> Result<CommandSpec, StageError> {
        require_input_file(request.input_path.as_path(), "trace input")?;
        let args = vec![
            String::from("--input"),
            request.input_path.to_string_lossy().to_string(),
            String::from("--output"),
            request.output_path.to_string_lossy().to_string(),
            String::from("--color-mode"),
            request.color_mode.clone(),
            String::from("--simplify"),
            request.simplify.to_string(),
            String::from("--corner-smoothing"),
            request.corner_smoothing.to_string(),
            String::from("--max-paths"),
            request.max_paths.to_string(),
            String::from("--json"),
        ];
        Ok(CommandSpec {
            program: self.toolchain.trace_binary.clone(),
            args,
            cwd: working_dir_for(request.output_path.as_path()),
            timeout: self.toolchain.trace_timeout,
        })
    }

    pub fn build_extract_command(
        &self,
        request: &ExtractRequest,
    ) -> Result<CommandSpec, StageError> {
        require_input_file(request.input_path.as_path(), "extract input")?;
        let args = vec![
            String::from("--kind"),
            String::from(request.kind.as_str()),
            String::from("--input"),
            request.input_path.to_string_lossy().to_string(),
            String::from("--output"),
            request.output_path.to_string_lossy().to_string(),
            String::from("--json"),
        ];
        Ok(CommandSpec {
            program: self.toolchain.extract_binary.clone(),
            args,
            cwd: working_dir_for(request.output_path.as_path()),
            timeout: self.toolchain.extract_timeout,
        })
    }

    fn run_stage<T>(
        &self,
        tool: &'static str,
        spec: CommandSpec,
        output_path: &Path,
    ) -> Result<T, StageError>
    where
        T: DeserializeOwned,
    {
        let timeout_secs = spec.timeout.as_secs();
        let output = match self.runner.run(&spec) {
            Ok(output) => output,
            Err(error) => {
                remove_partial_output(output_path);
                if error.is_deadline() {
                    return Err(StageError::Timeout { tool, timeout_secs });
                }
                let message = if error.is_missing_program() {
                    format!("binary '{}' was not found", spec.program)
                } else {
                    error.to_string()
                };
                return Err(StageError::ToolFailure {
                    tool,
                    exit_code: None,
                    message,
                });
            }
        };

        if output.status_code != 0 {
            remove_partial_output(output_path);
            return Err(StageError::ToolFailure {
                tool,
                exit_code: Some(output.status_code),
                message: diagnostic_tail(&output.stderr, &output.stdout),
            });
        }

        let report: T = match serde_json::from_str(output.stdout.as_str()) {
            Ok(report) => report,
            Err(source) => {
                remove_partial_output(output_path);
                return Err(StageError::ToolFailure {
                    tool,
                    exit_code: Some(0),
                    message: format!("undecodable stdout report: {source}"),
                });
            }
        };

        if !output_path.is_file() {
            return Err(StageError::ToolFailure {
                tool,
                exit_code: Some(0),
                message: format!(
                    "reported success but wrote no artifact at {}",
                    output_path.display()
                ),
            });
        }
        Ok(report)
    }
}

impl<R> StageAdapterOps for ToolStageAdapters<R>
where
    R: PipelineCommandRunner,
{
    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutcome, StageError> {
        let spec = self.build_synthesis_command(request)?;
        let report: SynthesisReport =
            self.run_stage("synthesis", spec, request.output_path.as_path())?;
        Ok(SynthesisOutcome {
            artifact: StageArtifact {
                path: request.output_path.clone(),
                content_kind: ContentKind::RasterPng,
                produced_by: "synthesis",
            },
            seed: report.seed,
        })
    }

    fn filter(&self, request: &FilterRequest) -> Result<StageArtifact, StageError> {
        let spec = self.build_filter_command(request)?;
        let _report: FilterReport =
            self.run_stage("preprocessing", spec, request.output_path.as_path())?;
        Ok(StageArtifact {
            path: request.output_path.clone(),
            content_kind: ContentKind::RasterPng,
            produced_by: "preprocessing",
        })
    }

    fn trace(&self, request: &TraceRequest) -> Result<TraceOutcome, StageError> {
        let spec = self.build_trace_command(request)?;
        let report: TraceReport =
            self.run_stage("vectorizing", spec, request.output_path.as_path())?;
        Ok(TraceOutcome {
            artifact: StageArtifact {
                path: request.output_path.clone(),
                content_kind: ContentKind::VectorSvg,
                produced_by: "vectorizing",
            },
            path_count: report.path_count,
        })
    }

    fn extract(&self, request: &ExtractRequest) -> Result<StageArtifact, StageError> {
        let spec = self.build_extract_command(request)?;
        let _report: ExtractReport =
            self.run_stage(request.kind.stage_label(), spec, request.output_path.as_path())?;
        Ok(StageArtifact {
            path: request.output_path.clone(),
            content_kind: ContentKind::MapPng,
            produced_by: request.kind.stage_label(),
        })
    }
}

fn require_input_file(path: &Path, label: &str) -> Result<(), StageError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StageError::InvalidInput(format!(
            "{label} not found: {}",
            path.display()
        )))
    }
}

fn working_dir_for(output_path: &Path) -> PathBuf {
    output_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn remove_partial_output(output_path: &Path) {
    let _ = fs::remove_file(output_path);
}

fn diagnostic_tail(stderr: &str, stdout: &str) -> String {
    let source = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    if source.is_empty() {
        return String::from("no diagnostic output");
    }
    let chars: Vec<char> = source.chars().collect();
    if chars.len() <= DIAGNOSTIC_TAIL_CHARS {
        return source.to_string();
    }
    chars[chars.len() - DIAGNOSTIC_TAIL_CHARS..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runtime::CommandOutput;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeRunner {
        seen: Arc<Mutex<Vec<CommandSpec>>>,
        next: Arc<Mutex<Option<Result<CommandOutput, PipelineRuntimeError>>>>,
    }

    impl FakeRunner {
        fn with_next(result: Result<CommandOutput, PipelineRuntimeError>) -> Self {
            Self {
                seen: Arc::new(Mutex::new(Vec::new())),
                next: Arc::new(Mutex::new(Some(result))),
            }
        }

        fn take_seen(&self) -> Vec<CommandSpec> {
            std::mem::take(&mut *self.seen.lock().expect("fake runner mutex poisoned"))
        }
    }

    impl PipelineCommandRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, PipelineRuntimeError> {
            self.seen
                .lock()
                .expect("fake runner mutex poisoned")
                .push(spec.clone());
            self.next
                .lock()
                .expect("fake runner mutex poisoned")
                .take()
                .unwrap_or_else(|| {
                    Ok(CommandOutput {
                        status_code: 0,
                        stdout: String::from("{}"),
                        stderr: String::new(),
                    })
                })
        }
    }

    fn temp_work_dir() -> PathBuf {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("kontur_stage_adapters_{stamp}"));
        std::fs::create_dir_all(&dir).expect("work dir should exist");
        dir
    }

    fn synthesis_request(output_path: PathBuf) -> SynthesisRequest {
        SynthesisRequest {
            prompt: String::from("a mountain peak, minimalist logo design"),
            negative_prompt: Some(String::from("gradients, shadows")),
            model: String::from("z-image-turbo"),
            width: 1024,
            height: 1024,
            steps: 16,
            seed: None,
            face_reference: None,
            reference_strength: None,
            lora: None,
            lora_scale: None,
            output_path,
        }
    }

    #[test]
    fn synthesis_command_carries_expected_flags() {
        let dir = temp_work_dir();
        let adapters = ToolStageAdapters::new(StageToolchain::default(), FakeRunner::default());
        let spec = adapters
            .build_synthesis_command(&synthesis_request(dir.join("source.png")))
            .expect("command should build");

        assert_eq!(spec.program, "kontur-synth");
        assert_eq!(spec.timeout, Duration::from_secs(600));
        assert_eq!(spec.cwd, dir);
        assert_eq!(spec.args.last(), Some(&String::from("--json")));
        let joined = spec.args.join(" ");
        assert!(joined.contains("-W 1024 -H 1024 -s 16"));
        assert!(joined.contains("--model z-image-turbo"));
        assert!(joined.contains("--negative-prompt"));
        assert!(joined.contains("--no-progress"));
        assert!(!joined.contains("--seed"));
    }

    #[test]
    fn synthesis_success_decodes_the_seed_report() {
        let dir = temp_work_dir();
        let output_path = dir.join("source.png");
        std::fs::write(&output_path, b"png").expect("artifact should exist");
        let runner = FakeRunner::with_next(Ok(CommandOutput {
            status_code: 0,
            stdout: String::from("{\"seed\": 814}"),
            stderr: String::new(),
        }));
        let adapters = ToolStageAdapters::new(StageToolchain::default(), runner.clone());

        let outcome = adapters
            .synthesize(&synthesis_request(output_path.clone()))
            .expect("synthesis should succeed");

        assert_eq!(outcome.seed, Some(814));
        assert_eq!(outcome.artifact.path, output_path);
        assert_eq!(outcome.artifact.produced_by, "synthesis");
        assert_eq!(runner.take_seen().len(), 1);
    }

    #[test]
    fn nonzero_exit_is_a_tool_failure_and_partial_output_is_removed() {
        let dir = temp_work_dir();
        let output_path = dir.join("source.png");
        std::fs::write(&output_path, b"partial").expect("partial should exist");
        let runner = FakeRunner::with_next(Ok(CommandOutput {
            status_code: 3,
            stdout: String::new(),
            stderr: String::from("CUDA out of memory"),
        }));
        let adapters = ToolStageAdapters::new(StageToolchain::default(), runner);

        let error = adapters
            .synthesize(&synthesis_request(output_path.clone()))
            .expect_err("synthesis should fail");

        match error {
            StageError::ToolFailure {
                exit_code, message, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(message.contains("CUDA out of memory"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!output_path.exists());
    }

    #[test]
    fn deadline_overrun_maps_to_timeout() {
        let dir = temp_work_dir();
        let runner = FakeRunner::with_next(Err(PipelineRuntimeError::DeadlineExceeded {
            program: String::from("kontur-synth"),
            timeout_secs: 600,
        }));
        let adapters = ToolStageAdapters::new(StageToolchain::default(), runner);

        let error = adapters
            .synthesize(&synthesis_request(dir.join("source.png")))
            .expect_err("synthesis should time out");

        assert!(error.is_timeout());
        assert_eq!(error.failure_kind(), FailureKind::Timeout);
    }

    #[test]
    fn missing_binary_is_a_tool_failure_naming_the_tool() {
        let dir = temp_work_dir();
        let runner = FakeRunner::with_next(Err(PipelineRuntimeError::Spawn {
            program: String::from("kontur-synth"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        }));
        let adapters = ToolStageAdapters::new(StageToolchain::default(), runner);

        let error = adapters
            .synthesize(&synthesis_request(dir.join("source.png")))
            .expect_err("synthesis should fail to spawn");

        match error {
            StageError::ToolFailure {
                exit_code, message, ..
            } => {
                assert_eq!(exit_code, None);
                assert!(message.contains("kontur-synth"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_exit_without_an_artifact_is_a_tool_failure() {
        let dir = temp_work_dir();
        let runner = FakeRunner::with_next(Ok(CommandOutput {
            status_code: 0,
            stdout: String::from("{\"seed\": 7}"),
            stderr: String::new(),
        }));
        let adapters = ToolStageAdapters::new(StageToolchain::default(), runner);

        let error = adapters
            .synthesize(&synthesis_request(dir.join("source.png")))
            .expect_err("missing artifact should fail");

        match error {
            StageError::ToolFailure { message, .. } => {
                assert!(message.contains("wrote no artifact"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn filter_with_a_missing_input_is_invalid_without_spawning() {
        let dir = temp_work_dir();
        let runner = FakeRunner::default();
        let adapters = ToolStageAdapters::new(StageToolchain::default(), runner.clone());

        let error = adapters
            .filter(&FilterRequest {
                input_path: dir.join("missing.png"),
                output_path: dir.join("preprocessed.png"),
                contrast: Some(1.2),
                brightness: None,
                saturation: None,
                sharpen: false,
                posterize: None,
            })
            .expect_err("missing input should be rejected");

        assert!(matches!(error, StageError::InvalidInput(_)));
        assert!(runner.take_seen().is_empty());
    }

    #[test]
    fn trace_command_and_report_round_out_the_vector_stage() {
        let dir = temp_work_dir();
        let input_path = dir.join("preprocessed.png");
        let output_path = dir.join("vector.svg");
        std::fs::write(&input_path, b"png").expect("input should exist");
        std::fs::write(&output_path, b"<svg/>").expect("artifact should exist");
        let runner = FakeRunner::with_next(Ok(CommandOutput {
            status_code: 0,
            stdout: String::from("{\"path_count\": 42}"),
            stderr: String::new(),
        }));
        let adapters = ToolStageAdapters::new(StageToolchain::default(), runner.clone());

        let outcome = adapters
            .trace(&TraceRequest {
                input_path,
                output_path: output_path.clone(),
                color_mode: String::from("color"),
                simplify: 0.8,
                corner_smoothing: 0.7,
                max_paths: 64,
            })
            .expect("trace should succeed");

        assert_eq!(outcome.path_count, Some(42));
        assert_eq!(outcome.artifact.content_kind, ContentKind::VectorSvg);
        let seen = runner.take_seen();
        assert_eq!(seen.len(), 1);
        let joined = seen[0].args.join(" ");
        assert!(joined.contains("--color-mode color"));
        assert!(joined.contains("--max-paths 64"));
    }

    #[test]
    fn sharpen_is_a_bare_flag() {
        let dir = temp_work_dir();
        let input_path = dir.join("source.png");
        std::fs::write(&input_path, b"png").expect("input should exist");
        let adapters = ToolStageAdapters::new(StageToolchain::default(), FakeRunner::default());

        let spec = adapters
            .build_filter_command(&FilterRequest {
                input_path,
                output_path: dir.join("preprocessed.png"),
                contrast: None,
                brightness: None,
                saturation: None,
                sharpen: true,
                posterize: Some(4),
            })
            .expect("command should build");

        let joined = spec.args.join(" ");
        assert!(joined.contains("--sharpen --posterize 4"));
        assert_eq!(spec.program, "kontur-filter");
    }
}
