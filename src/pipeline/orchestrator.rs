use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{CatalogError, EnhancementStyle, ModelSpec, ParameterCatalog, SvgPreset};
use crate::config::DEFAULT_MAX_DIMENSION;
use crate::db::history::{HistoryStore, NewHistoryRecord};
use crate::db::loras::LoraRecord;
use crate::enhance::enhance_prompt;
use crate::loras::{LoraRegistry, LoraRegistryError};
use crate::pipeline::gate::SynthesisGate;
use crate::pipeline::stage_adapters::{
    ExtractKind, ExtractRequest, FilterRequest, SharedStageAdapterOps, StageError,
    SynthesisRequest, TraceRequest,
};
use crate::pipeline::{
    CancelToken, ContentKind, FailureKind, OutputKind, RunState, RunStateCell, StageArtifact,
};
use crate::storage::{ArtifactStore, RunWorkspace};

pub const MIN_DIMENSION: u32 = 256;
pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 50;

const DEFAULT_DIMENSION: u32 = 1024;

/// Inbound generation request. Every field is serde-defaulted so malformed
/// bodies reach [`PipelineOrchestrator::validate`] and come back as precise
/// validation messages instead of deserializer rejections.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerateRequest {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub model: Option<String>,
    pub steps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<i64>,
    pub image: Option<String>,
    pub image_strength: Option<f32>,
    pub face_reference: Option<String>,
    pub template: Option<String>,
    pub enhance_style: Option<String>,
    pub lora: Option<String>,
    pub lora_scale: Option<f32>,
    pub preprocess: Option<PreprocessSpec>,
    pub outputs: Vec<String>,
    pub svg_preset: Option<String>,
}

/// Raster adjustments applied before fan-out. The filter tool is skipped
/// entirely when every field is absent.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessSpec {
    pub contrast: Option<f32>,
    pub brightness: Option<f32>,
    pub saturation: Option<f32>,
    pub sharpen: bool,
    pub posterize: Option<u8>,
}

impl PreprocessSpec {
    pub fn is_empty(&self) -> bool {
        self.contrast.is_none()
            && self.brightness.is_none()
            && self.saturation.is_none()
            && !self.sharpen
            && self.posterize.is_none()
    }
}

/// Request refused before the pipeline touched any external resource. No
/// history record exists for a rejected request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunRejection {
    #[error("{0}")]
    Validation(String),
    #[error("unknown {kind} '{identifier}'")]
    NotFound {
        kind: &'static str,
        identifier: String,
    },
    #[error("internal fault: {0}")]
    Internal(String),
}

impl From<CatalogError> for RunRejection {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::NotFound { kind, identifier } => Self::NotFound { kind, identifier },
        }
    }
}

impl From<LoraRegistryError> for RunRejection {
    fn from(error: LoraRegistryError) -> Self {
        match error {
            LoraRegistryError::NotFound(identifier) => Self::NotFound {
                kind: "lora",
                identifier,
            },
            LoraRegistryError::Validation(message) => Self::Validation(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLora {
    pub record: LoraRecord,
    pub scale: f32,
}

/// Request after validation: references resolved against the catalog and
/// registry, dimensions rounded, template substitution already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub model: &'static ModelSpec,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub seed: Option<i64>,
    pub source_image: Option<Vec<u8>>,
    pub face_reference: Option<Vec<u8>>,
    pub image_strength: Option<f32>,
    pub template: Option<String>,
    pub enhance_style: Option<&'static EnhancementStyle>,
    pub lora: Option<ResolvedLora>,
    pub preprocess: PreprocessSpec,
    pub outputs: BTreeSet<OutputKind>,
    pub svg_preset: Option<&'static SvgPreset>,
}

impl ValidatedRequest {
    pub fn is_conversion(&self) -> bool {
        self.source_image.is_some()
    }

    pub fn wants(&self, kind: OutputKind) -> bool {
        self.outputs.contains(&kind)
    }
}

/// One requested output in the result map: either a persisted artifact or
/// the failure that kept it from being produced.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OutputEntry {
    Artifact {
        filename: String,
        url: String,
        content_kind: &'static str,
    },
    Failed {
        error: OutputError,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutputError {
    pub stage: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestEcho {
    pub mode: &'static str,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub model: String,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhance_style: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub optimizations_applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_scale: Option<f32>,
    pub outputs: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub svg_preset: Option<String>,
}

/// Terminal outcome of one run. A failed run is still a result; only
/// validation rejections bypass this type.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationResult {
    pub run_id: String,
    pub status: String,
    pub request: RequestEcho,
    pub outputs: BTreeMap<String, OutputEntry>,
    pub duration_ms: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutputError>,
}

/// Drives one request through the full state machine:
/// Validating -> Enhancing -> Synthesizing | LoadingInput -> Preprocessing
/// -> FanningOut -> Aggregating -> terminal, with an unconditional history
/// append at the end of every run that got past validation.
pub struct PipelineOrchestrator {
    catalog: ParameterCatalog,
    adapters: SharedStageAdapterOps,
    gate: Arc<SynthesisGate>,
    artifacts: ArtifactStore,
    history: HistoryStore,
    loras: LoraRegistry,
    max_dimension: u32,
}

impl PipelineOrchestrator {
    pub fn new(
        catalog: ParameterCatalog,
        adapters: SharedStageAdapterOps,
        gate: Arc<SynthesisGate>,
        artifacts: ArtifactStore,
        history: HistoryStore,
        loras: LoraRegistry,
    ) -> Self {
        Self {
            catalog,
            adapters,
            gate,
            artifacts,
            history,
            loras,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn execute(
        &self,
        run_id: Uuid,
        request: &GenerateRequest,
        state: &RunStateCell,
        cancel: &CancelToken,
    ) -> Result<GenerationResult, RunRejection> {
        let run_started = Instant::now();
        let validated = match self.validate(request) {
            Ok(validated) => validated,
            Err(rejection) => {
                state.advance(RunState::Failed);
                return Err(rejection);
            }
        };
        tracing::info!(
            run_id = %run_id,
            mode = if validated.is_conversion() { "conversion" } else { "synthesis" },
            model = validated.model.id,
            "pipeline run accepted"
        );

        state.advance(RunState::Enhancing);
        let prompts = self.prepare_prompts(&validated);

        let workspace = match self.artifacts.create_run_workspace(run_id) {
            Ok(workspace) => workspace,
            Err(error) => {
                state.advance(RunState::Failed);
                return Err(RunRejection::Internal(format!(
                    "could not create run workspace: {error}"
                )));
            }
        };

        let attempt = RunAttempt {
            pipeline: self,
            run_id,
            request: &validated,
            prompts: &prompts,
            state,
            cancel,
            workspace,
            durations: BTreeMap::new(),
            reported_seed: None,
        };
        Ok(attempt.finish(run_started))
    }

    /// Checks every request field and resolves every catalog/registry
    /// reference before any side effect. Unknown identifiers come back as
    /// `NotFound`, everything else as `Validation`.
    pub fn validate(&self, request: &GenerateRequest) -> Result<ValidatedRequest, RunRejection> {
        if request.outputs.is_empty() {
            return Err(invalid("outputs must name at least one output kind"));
        }
        let mut outputs = BTreeSet::new();
        for raw in &request.outputs {
            let kind = OutputKind::parse(raw)
                .ok_or_else(|| invalid(format!("unknown output kind '{}'", raw.trim())))?;
            outputs.insert(kind);
        }

        let prompt = non_empty(request.prompt.as_deref());
        let image = non_empty(request.image.as_deref());
        match (prompt, image) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "request carries both a prompt and an image; send exactly one",
                ));
            }
            (None, None) => {
                return Err(invalid("request needs either a prompt or a source image"));
            }
            _ => {}
        }

        if image.is_some() {
            if request.template.is_some() {
                return Err(invalid("template requires a prompt to use as its subject"));
            }
            if request.enhance_style.is_some() {
                return Err(invalid("enhance_style requires a prompt"));
            }
            if request.face_reference.is_some() {
                return Err(invalid("face_reference requires a prompt"));
            }
        }
        if request.image_strength.is_some() && request.face_reference.is_none() {
            return Err(invalid("image_strength requires a face_reference"));
        }
        if let Some(strength) = request.image_strength {
            if !(0.0..=1.0).contains(&strength) {
                return Err(invalid("image_strength must be between 0.0 and 1.0"));
            }
        }

        let model = match non_empty(request.model.as_deref()) {
            Some(identifier) => self.catalog.model(identifier)?,
            None => self.catalog.default_model(),
        };
        let steps = request.steps.unwrap_or(model.default_steps);
        if !(MIN_STEPS..=MAX_STEPS).contains(&steps) {
            return Err(invalid(format!(
                "steps must be between {MIN_STEPS} and {MAX_STEPS}"
            )));
        }
        let width = self.checked_dimension("width", request.width.unwrap_or(DEFAULT_DIMENSION))?;
        let height =
            self.checked_dimension("height", request.height.unwrap_or(DEFAULT_DIMENSION))?;

        let mut effective_prompt = prompt.map(str::to_string).unwrap_or_default();
        let mut negative = non_empty(request.negative_prompt.as_deref()).map(str::to_string);
        let mut preset_id = non_empty(request.svg_preset.as_deref()).map(str::to_string);
        let mut template_id = None;
        if let Some(identifier) = non_empty(request.template.as_deref()) {
            let applied = self
                .catalog
                .apply_template(identifier, effective_prompt.as_str())?;
            effective_prompt = applied.prompt;
            if negative.is_none() {
                negative = Some(applied.negative_prompt);
            }
            if preset_id.is_none() {
                preset_id = Some(applied.svg_preset);
            }
            template_id = Some(applied.template_id);
        }

        let enhance_style = match non_empty(request.enhance_style.as_deref()) {
            Some(identifier) => Some(self.catalog.enhancement_style(identifier)?),
            None => None,
        };

        let lora = match non_empty(request.lora.as_deref()) {
            Some(identifier) => {
                let record = self.loras.resolve(identifier)?;
                let scale = match request.lora_scale {
                    Some(value) => {
                        if !(0.0..=1.0).contains(&value) {
                            return Err(invalid("lora_scale must be between 0.0 and 1.0"));
                        }
                        value
                    }
                    None => record.default_scale as f32,
                };
                Some(ResolvedLora { record, scale })
            }
            None => {
                if request.lora_scale.is_some() {
                    return Err(invalid("lora_scale requires a lora"));
                }
                None
            }
        };

        let preprocess = request.preprocess.unwrap_or_default();
        check_preprocess(&preprocess)?;

        let svg_preset = match preset_id.as_deref() {
            Some(identifier) => Some(self.catalog.svg_preset(identifier)?),
            None => None,
        };
        if outputs.contains(&OutputKind::Vector) && svg_preset.is_none() {
            return Err(invalid("vector output requires an svg_preset"));
        }

        let source_image = match image {
            Some(encoded) => {
                let bytes = decode_base64_field("image", encoded)?;
                if bytes.is_empty() {
                    return Err(invalid("image decoded to zero bytes"));
                }
                Some(bytes)
            }
            None => None,
        };
        let face_reference = match non_empty(request.face_reference.as_deref()) {
            Some(encoded) => Some(decode_base64_field("face_reference", encoded)?),
            None => None,
        };

        Ok(ValidatedRequest {
            prompt: effective_prompt,
            negative_prompt: negative,
            model,
            steps,
            width,
            height,
            seed: request.seed,
            source_image,
            face_reference,
            image_strength: request.image_strength,
            template: template_id,
            enhance_style,
            lora,
            preprocess,
            outputs,
            svg_preset,
        })
    }

    fn prepare_prompts(&self, request: &ValidatedRequest) -> PreparedPrompts {
        let Some(style) = request.enhance_style else {
            return PreparedPrompts {
                prompt: request.prompt.clone(),
                negative: request.negative_prompt.clone(),
                optimizations: Vec::new(),
            };
        };
        let enhanced = enhance_prompt(request.prompt.as_str(), Some(style));
        let negative = request.negative_prompt.clone().or_else(|| {
            if enhanced.negative_prompt.is_empty() {
                None
            } else {
                Some(enhanced.negative_prompt.clone())
            }
        });
        PreparedPrompts {
            prompt: enhanced.enhanced,
            negative,
            optimizations: enhanced.optimizations_applied,
        }
    }

    fn checked_dimension(&self, field: &'static str, value: u32) -> Result<u32, RunRejection> {
        if value < MIN_DIMENSION || value > self.max_dimension {
            return Err(invalid(format!(
                "{field} must be between {MIN_DIMENSION} and {}",
                self.max_dimension
            )));
        }
        Ok(round_up_to_multiple_of_16(value))
    }
}

/// Synthesis backends want 16-aligned dimensions; requests round up, never
/// down, so the range check happens on the raw value first.
fn round_up_to_multiple_of_16(value: u32) -> u32 {
    value.div_ceil(16) * 16
}

fn check_preprocess(spec: &PreprocessSpec) -> Result<(), RunRejection> {
    if let Some(contrast) = spec.contrast {
        if !(0.5..=2.0).contains(&contrast) {
            return Err(invalid("preprocess.contrast must be between 0.5 and 2.0"));
        }
    }
    if let Some(brightness) = spec.brightness {
        if !(-0.5..=0.5).contains(&brightness) {
            return Err(invalid(
                "preprocess.brightness must be between -0.5 and 0.5",
            ));
        }
    }
    if let Some(saturation) = spec.saturation {
        if !(0.0..=2.0).contains(&saturation) {
            return Err(invalid("preprocess.saturation must be between 0.0 and 2.0"));
        }
    }
    if let Some(posterize) = spec.posterize {
        if !(2..=8).contains(&posterize) {
            return Err(invalid("preprocess.posterize must be between 2 and 8"));
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> RunRejection {
    RunRejection::Validation(message.into())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

fn decode_base64_field(field: &'static str, value: &str) -> Result<Vec<u8>, RunRejection> {
    let trimmed = value.trim();
    let payload = match trimmed.split_once("base64,") {
        Some((head, tail)) if head.starts_with("data:") => tail,
        _ => trimmed,
    };
    STANDARD
        .decode(payload.as_bytes())
        .map_err(|error| invalid(format!("{field} is not valid base64: {error}")))
}

#[derive(Debug, Clone, PartialEq)]
struct PreparedPrompts {
    prompt: String,
    negative: Option<String>,
    optimizations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct StageFailure {
    stage: &'static str,
    kind: FailureKind,
    message: String,
}

impl StageFailure {
    fn from_stage_error(stage: &'static str, error: &StageError) -> Self {
        Self {
            stage,
            kind: error.failure_kind(),
            message: error.to_string(),
        }
    }
}

impl From<&StageFailure> for OutputError {
    fn from(failure: &StageFailure) -> Self {
        Self {
            stage: failure.stage.to_string(),
            kind: failure.kind.as_str(),
            message: failure.message.clone(),
        }
    }
}

enum RunProgress {
    Produced {
        raster: StageArtifact,
        branches: BTreeMap<OutputKind, Result<StageArtifact, StageFailure>>,
    },
    Aborted(StageFailure),
}

/// Mutable context for one run between validation and the terminal record.
struct RunAttempt<'a> {
    pipeline: &'a PipelineOrchestrator,
    run_id: Uuid,
    request: &'a ValidatedRequest,
    prompts: &'a PreparedPrompts,
    state: &'a RunStateCell,
    cancel: &'a CancelToken,
    workspace: RunWorkspace,
    durations: BTreeMap<String, u64>,
    reported_seed: Option<i64>,
}

impl RunAttempt<'_> {
    fn finish(mut self, run_started: Instant) -> GenerationResult {
        let progress = self.run_stages();
        let mut outputs = BTreeMap::new();
        let (status, failure) = match progress {
            RunProgress::Aborted(failure) => (RunState::Failed, Some(failure)),
            RunProgress::Produced { raster, branches } => {
                self.state.advance(RunState::Aggregating);
                self.aggregate(&raster, branches, &mut outputs)
            }
        };
        self.state.advance(status);
        self.workspace.cleanup();

        let total_ms = run_started.elapsed().as_millis() as i64;
        tracing::info!(
            run_id = %self.run_id,
            status = status.as_str(),
            total_ms,
            "pipeline run finished"
        );
        self.append_history(status, &failure, &outputs, total_ms);

        let echo = self.echo();
        GenerationResult {
            run_id: self.run_id.to_string(),
            status: status.as_str().to_string(),
            request: echo,
            outputs,
            duration_ms: self.durations,
            seed: self.reported_seed,
            error: failure.as_ref().map(OutputError::from),
        }
    }

    fn run_stages(&mut self) -> RunProgress {
        let source = match self.produce_raster() {
            Ok(artifact) => artifact,
            Err(failure) => return RunProgress::Aborted(failure),
        };
        let prepared = match self.preprocess(source) {
            Ok(artifact) => artifact,
            Err(failure) => return RunProgress::Aborted(failure),
        };
        match self.fan_out(&prepared) {
            Ok(branches) => RunProgress::Produced {
                raster: prepared,
                branches,
            },
            Err(failure) => RunProgress::Aborted(failure),
        }
    }

    fn produce_raster(&mut self) -> Result<StageArtifact, StageFailure> {
        let request = self.request;
        if let Some(bytes) = request.source_image.as_deref() {
            self.state.advance(RunState::LoadingInput);
            self.load_input(bytes)
        } else {
            self.state.advance(RunState::Synthesizing);
            self.synthesize()
        }
    }

    fn load_input(&mut self, bytes: &[u8]) -> Result<StageArtifact, StageFailure> {
        let stage = "loading_input";
        let started = Instant::now();
        let result = self.load_input_inner(stage, bytes);
        self.record_duration(stage, started);
        result
    }

    fn load_input_inner(
        &mut self,
        stage: &'static str,
        bytes: &[u8],
    ) -> Result<StageArtifact, StageFailure> {
        self.check_cancel(stage)?;
        if let Err(error) = image::load_from_memory(bytes) {
            return Err(StageFailure {
                stage,
                kind: FailureKind::InvalidInput,
                message: format!("source image is not a decodable raster: {error}"),
            });
        }
        let path = self.workspace.stage_path("source.png");
        fs::write(path.as_path(), bytes).map_err(|error| StageFailure {
            stage,
            kind: FailureKind::Io,
            message: format!("could not write source artifact: {error}"),
        })?;
        Ok(StageArtifact {
            path,
            content_kind: ContentKind::RasterPng,
            produced_by: stage,
        })
    }

    /// Runs synthesis under the gate. The lease is released before this
    /// returns on every path; a revoked lease fails the run with
    /// `ResourceTimeout` no matter what the tool produced.
    fn synthesize(&mut self) -> Result<StageArtifact, StageFailure> {
        let stage = "synthesizing";
        let started = Instant::now();
        let result = self.synthesize_inner(stage);
        self.record_duration(stage, started);
        result
    }

    fn synthesize_inner(&mut self, stage: &'static str) -> Result<StageArtifact, StageFailure> {
        self.check_cancel(stage)?;

        let face_path = match self.request.face_reference.as_deref() {
            Some(bytes) => {
                let path = self.workspace.stage_path("face_reference.png");
                fs::write(path.as_path(), bytes).map_err(|error| StageFailure {
                    stage,
                    kind: FailureKind::Io,
                    message: format!("could not write face reference: {error}"),
                })?;
                Some(path)
            }
            None => None,
        };

        let lease = self
            .pipeline
            .gate
            .acquire(self.cancel)
            .map_err(|_| self.cancelled(stage))?;
        if self.cancel.is_cancelled() {
            let _ = lease.release();
            return Err(self.cancelled(stage));
        }

        let request = SynthesisRequest {
            prompt: self.prompts.prompt.clone(),
            negative_prompt: self.prompts.negative.clone(),
            model: self.request.model.backend_id.to_string(),
            width: self.request.width,
            height: self.request.height,
            steps: self.request.steps,
            seed: self.request.seed,
            face_reference: face_path,
            reference_strength: self.request.image_strength,
            lora: self
                .request
                .lora
                .as_ref()
                .map(|lora| PathBuf::from(lora.record.path.as_str())),
            lora_scale: self.request.lora.as_ref().map(|lora| lora.scale),
            output_path: self.workspace.stage_path("synthesis.png"),
        };

        let mut outcome = self.pipeline.adapters.synthesize(&request);
        if outcome.as_ref().err().is_some_and(StageError::is_timeout) {
            if self.cancel.is_cancelled() {
                let _ = lease.release();
                return Err(self.cancelled(stage));
            }
            tracing::warn!(
                run_id = %self.run_id,
                "synthesis hit its deadline; retrying once with identical parameters"
            );
            outcome = self.pipeline.adapters.synthesize(&request);
        }

        let revoked = lease.release();
        if revoked {
            return Err(StageFailure {
                stage,
                kind: FailureKind::ResourceTimeout,
                message: String::from(
                    "synthesis lease exceeded the maximum hold and was revoked",
                ),
            });
        }
        self.check_cancel(stage)?;

        match outcome {
            Ok(synthesis) => {
                self.reported_seed = synthesis.seed;
                Ok(synthesis.artifact)
            }
            Err(error) => Err(StageFailure::from_stage_error(stage, &error)),
        }
    }

    fn preprocess(&mut self, source: StageArtifact) -> Result<StageArtifact, StageFailure> {
        self.state.advance(RunState::Preprocessing);
        let spec = self.request.preprocess;
        if spec.is_empty() {
            return Ok(source);
        }

        let stage = "preprocessing";
        let started = Instant::now();
        let result = self.preprocess_inner(stage, &source, &spec);
        self.record_duration(stage, started);
        result
    }

    fn preprocess_inner(
        &mut self,
        stage: &'static str,
        source: &StageArtifact,
        spec: &PreprocessSpec,
    ) -> Result<StageArtifact, StageFailure> {
        self.check_cancel(stage)?;
        let request = FilterRequest {
            input_path: source.path.clone(),
            output_path: self.workspace.stage_path("preprocessed.png"),
            contrast: spec.contrast,
            brightness: spec.brightness,
            saturation: spec.saturation,
            sharpen: spec.sharpen,
            posterize: spec.posterize,
        };
        let outcome = self.pipeline.adapters.filter(&request);
        self.check_cancel(stage)?;
        outcome.map_err(|error| StageFailure::from_stage_error(stage, &error))
    }

    /// One adapter invocation per requested kind, in deterministic order.
    /// A branch failure is isolated; only cancellation aborts the run here.
    fn fan_out(
        &mut self,
        source: &StageArtifact,
    ) -> Result<BTreeMap<OutputKind, Result<StageArtifact, StageFailure>>, StageFailure> {
        self.state.advance(RunState::FanningOut);
        let mut branches = BTreeMap::new();
        for kind in OutputKind::FAN_OUT_ORDER {
            if !self.request.wants(kind) {
                continue;
            }
            self.check_cancel(kind.stage_label())?;
            let branch = self.run_branch(kind, source);
            branches.insert(kind, branch);
            self.check_cancel(kind.stage_label())?;
        }
        Ok(branches)
    }

    fn run_branch(
        &mut self,
        kind: OutputKind,
        source: &StageArtifact,
    ) -> Result<StageArtifact, StageFailure> {
        let stage = kind.stage_label();
        let started = Instant::now();
        let result = self.run_branch_inner(stage, kind, source);
        self.record_duration(stage, started);
        if let Err(failure) = &result {
            tracing::warn!(
                run_id = %self.run_id,
                stage,
                kind = failure.kind.as_str(),
                "fan-out stage failed; remaining outputs continue"
            );
        }
        result
    }

    fn run_branch_inner(
        &mut self,
        stage: &'static str,
        kind: OutputKind,
        source: &StageArtifact,
    ) -> Result<StageArtifact, StageFailure> {
        match kind {
            OutputKind::Vector => {
                let Some(preset) = self.request.svg_preset else {
                    return Err(StageFailure {
                        stage,
                        kind: FailureKind::InvalidInput,
                        message: String::from("vector output requested without an svg preset"),
                    });
                };
                let request = TraceRequest {
                    input_path: source.path.clone(),
                    output_path: self.workspace.stage_path("vector.svg"),
                    color_mode: preset.color_mode.as_str().to_string(),
                    simplify: preset.simplify_tolerance,
                    corner_smoothing: preset.corner_smoothing,
                    max_paths: preset.max_paths,
                };
                let outcome = self
                    .pipeline
                    .adapters
                    .trace(&request)
                    .map_err(|error| StageFailure::from_stage_error(stage, &error))?;
                if let Some(path_count) = outcome.path_count {
                    tracing::info!(
                        run_id = %self.run_id,
                        path_count,
                        ceiling = preset.max_paths,
                        "vector trace finished"
                    );
                }
                Ok(outcome.artifact)
            }
            OutputKind::Edge => self.extract_branch(stage, ExtractKind::Edge, source),
            OutputKind::Depth => self.extract_branch(stage, ExtractKind::Depth, source),
            OutputKind::Saliency => self.extract_branch(stage, ExtractKind::Saliency, source),
            OutputKind::Raster => Err(StageFailure {
                stage,
                kind: FailureKind::InvalidInput,
                message: String::from("raster is published from the preprocessed artifact"),
            }),
        }
    }

    fn extract_branch(
        &mut self,
        stage: &'static str,
        kind: ExtractKind,
        source: &StageArtifact,
    ) -> Result<StageArtifact, StageFailure> {
        let output_name = format!("{}.png", kind.as_str());
        let request = ExtractRequest {
            kind,
            input_path: source.path.clone(),
            output_path: self.workspace.stage_path(output_name.as_str()),
        };
        self.pipeline
            .adapters
            .extract(&request)
            .map_err(|error| StageFailure::from_stage_error(stage, &error))
    }

    fn aggregate(
        &mut self,
        raster: &StageArtifact,
        branches: BTreeMap<OutputKind, Result<StageArtifact, StageFailure>>,
        outputs: &mut BTreeMap<String, OutputEntry>,
    ) -> (RunState, Option<StageFailure>) {
        let mut results = Vec::new();
        if self.request.wants(OutputKind::Raster) {
            results.push((
                OutputKind::Raster,
                self.persist_entry(OutputKind::Raster, raster),
            ));
        }
        for (kind, branch) in branches {
            let persisted = match branch {
                Ok(artifact) => self.persist_entry(kind, &artifact),
                Err(failure) => Err(failure),
            };
            results.push((kind, persisted));
        }

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut first_failure: Option<StageFailure> = None;
        for (kind, persisted) in results {
            match persisted {
                Ok(entry) => {
                    succeeded += 1;
                    outputs.insert(kind.as_str().to_string(), entry);
                }
                Err(failure) => {
                    failed += 1;
                    outputs.insert(
                        kind.as_str().to_string(),
                        OutputEntry::Failed {
                            error: OutputError::from(&failure),
                        },
                    );
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }

        let status = if failed == 0 {
            RunState::Complete
        } else if succeeded > 0 {
            RunState::Partial
        } else {
            RunState::Failed
        };
        let failure = if status == RunState::Failed {
            first_failure
        } else {
            None
        };
        (status, failure)
    }

    fn persist_entry(
        &self,
        kind: OutputKind,
        artifact: &StageArtifact,
    ) -> Result<OutputEntry, StageFailure> {
        match self
            .pipeline
            .artifacts
            .persist_artifact(self.run_id, kind, artifact.path.as_path())
        {
            Ok((filename, _path)) => Ok(OutputEntry::Artifact {
                url: format!("/api/outputs/{filename}"),
                content_kind: kind.content_kind().as_str(),
                filename,
            }),
            Err(error) => Err(StageFailure {
                stage: "aggregating",
                kind: FailureKind::Io,
                message: format!("could not persist {} artifact: {error}", kind.as_str()),
            }),
        }
    }

    fn append_history(
        &self,
        status: RunState,
        failure: &Option<StageFailure>,
        outputs: &BTreeMap<String, OutputEntry>,
        total_ms: i64,
    ) {
        let request = self.request;
        let record = NewHistoryRecord {
            run_id: self.run_id,
            prompt: self.prompts.prompt.clone(),
            negative_prompt: self.prompts.negative.clone(),
            model: request.model.id.to_string(),
            width: request.width,
            height: request.height,
            steps: request.steps,
            seed: self
                .reported_seed
                .or(request.seed)
                .map(|seed| seed.to_string()),
            svg_preset: request.svg_preset.map(|preset| preset.id.to_string()),
            lora_id: request.lora.as_ref().map(|lora| lora.record.id.clone()),
            lora_scale: request.lora.as_ref().map(|lora| f64::from(lora.scale)),
            status: status.as_str().to_string(),
            failure_stage: failure.as_ref().map(|failure| failure.stage.to_string()),
            failure_kind: failure
                .as_ref()
                .map(|failure| failure.kind.as_str().to_string()),
            outputs: serde_json::to_value(outputs).unwrap_or(Value::Null),
            durations: serde_json::to_value(&self.durations).unwrap_or(Value::Null),
            duration_ms: total_ms,
        };
        if let Err(error) = self.pipeline.history.append(&record) {
            tracing::error!(
                run_id = %self.run_id,
                error = %error,
                "history append failed for a finished run"
            );
        }
    }

    fn echo(&self) -> RequestEcho {
        let request = self.request;
        RequestEcho {
            mode: if request.is_conversion() {
                "conversion"
            } else {
                "synthesis"
            },
            prompt: self.prompts.prompt.clone(),
            negative_prompt: self.prompts.negative.clone(),
            model: request.model.id.to_string(),
            steps: request.steps,
            width: request.width,
            height: request.height,
            seed: request.seed,
            template: request.template.clone(),
            enhance_style: request.enhance_style.map(|style| style.id.to_string()),
            optimizations_applied: self.prompts.optimizations.clone(),
            lora: request.lora.as_ref().map(|lora| lora.record.id.clone()),
            lora_scale: request.lora.as_ref().map(|lora| lora.scale),
            outputs: request.outputs.iter().map(|kind| kind.as_str()).collect(),
            svg_preset: request.svg_preset.map(|preset| preset.id.to_string()),
        }
    }

    fn record_duration(&mut self, stage: &str, started: Instant) {
        self.durations
            .insert(stage.to_string(), started.elapsed().as_millis() as u64);
    }

    fn cancelled(&self, stage: &'static str) -> StageFailure {
        StageFailure {
            stage,
            kind: FailureKind::Cancelled,
            message: String::from("run cancelled"),
        }
    }

    fn check_cancel(&self, stage: &'static str) -> Result<(), StageFailure> {
        if self.cancel.is_cancelled() {
            Err(self.cancelled(stage))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::history::HistoryQuery;
    use crate::db::loras::LoraStore;
    use crate::pipeline::stage_adapters::{StageAdapterOps, SynthesisOutcome, TraceOutcome};
    use std::path::Path;
    use std::time::Duration;

    struct InertAdapters;

    impl StageAdapterOps for InertAdapters {
        fn synthesize(&self, _request: &SynthesisRequest) -> Result<SynthesisOutcome, StageError> {
            Err(StageError::ToolFailure {
                tool: "kontur-synth",
                exit_code: Some(1),
                message: String::from("no synthesis tool in unit tests"),
            })
        }

        fn filter(&self, _request: &FilterRequest) -> Result<StageArtifact, StageError> {
            Err(StageError::ToolFailure {
                tool: "kontur-filter",
                exit_code: Some(1),
                message: String::from("no filter tool in unit tests"),
            })
        }

        fn trace(&self, _request: &TraceRequest) -> Result<TraceOutcome, StageError> {
            Err(StageError::ToolFailure {
                tool: "kontur-trace",
                exit_code: Some(1),
                message: String::from("no trace tool in unit tests"),
            })
        }

        fn extract(&self, _request: &ExtractRequest) -> Result<StageArtifact, StageError> {
            Err(StageError::ToolFailure {
                tool: "kontur-extract",
                exit_code: Some(1),
                message: String::from("no extract tool in unit tests"),
            })
        }
    }

    fn temp_root(label: &str) -> PathBuf {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("kontur_orchestrator_{label}_{stamp}"));
        std::fs::create_dir_all(dir.as_path()).expect("temp dir should be created");
        dir
    }

    fn test_orchestrator(root: &Path) -> PipelineOrchestrator {
        let artifacts = ArtifactStore::new(root.join("outputs"), root.join("work"));
        let history = HistoryStore::new(root.join("history.db"));
        let loras = LoraRegistry::new(LoraStore::new(root.join("history.db")), root.join("loras"));
        PipelineOrchestrator::new(
            ParameterCatalog::builtin(),
            Arc::new(InertAdapters),
            SynthesisGate::new(Duration::from_secs(60)),
            artifacts,
            history,
            loras,
        )
    }

    fn prompt_request(outputs: &[&str]) -> GenerateRequest {
        GenerateRequest {
            prompt: Some(String::from("angular fox emblem")),
            outputs: outputs.iter().map(|kind| kind.to_string()).collect(),
            ..GenerateRequest::default()
        }
    }

    fn tiny_png() -> Vec<u8> {
        let mut bytes = Vec::new();
        let pixels = image::RgbaImage::from_pixel(4, 4, image::Rgba([120, 40, 200, 255]));
        pixels
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .expect("png encode should succeed");
        bytes
    }

    #[test]
    fn validate_requires_exactly_one_of_prompt_and_image() {
        let root = temp_root("prompt_xor");
        let orchestrator = test_orchestrator(root.as_path());

        let neither = GenerateRequest {
            outputs: vec![String::from("raster")],
            ..GenerateRequest::default()
        };
        let err = orchestrator
            .validate(&neither)
            .expect_err("neither prompt nor image should be rejected");
        assert_eq!(
            err,
            RunRejection::Validation(String::from(
                "request needs either a prompt or a source image"
            ))
        );

        let both = GenerateRequest {
            prompt: Some(String::from("a fox")),
            image: Some(STANDARD.encode(tiny_png())),
            outputs: vec![String::from("raster")],
            ..GenerateRequest::default()
        };
        let err = orchestrator
            .validate(&both)
            .expect_err("prompt and image together should be rejected");
        assert!(matches!(err, RunRejection::Validation(_)));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn validate_rounds_dimensions_up_to_the_next_multiple_of_16() {
        let root = temp_root("dims");
        let orchestrator = test_orchestrator(root.as_path());
        let request = GenerateRequest {
            width: Some(500),
            height: Some(1000),
            ..prompt_request(&["raster"])
        };

        let validated = orchestrator
            .validate(&request)
            .expect("in-range dimensions should validate");

        assert_eq!(validated.width, 512);
        assert_eq!(validated.height, 1008);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn validate_rejects_out_of_range_dimensions_and_steps() {
        let root = temp_root("ranges");
        let orchestrator = test_orchestrator(root.as_path());

        let narrow = GenerateRequest {
            width: Some(100),
            ..prompt_request(&["raster"])
        };
        assert!(matches!(
            orchestrator.validate(&narrow),
            Err(RunRejection::Validation(_))
        ));

        let oversized = GenerateRequest {
            height: Some(4096),
            ..prompt_request(&["raster"])
        };
        assert!(matches!(
            orchestrator.validate(&oversized),
            Err(RunRejection::Validation(_))
        ));

        let too_many_steps = GenerateRequest {
            steps: Some(51),
            ..prompt_request(&["raster"])
        };
        assert!(matches!(
            orchestrator.validate(&too_many_steps),
            Err(RunRejection::Validation(_))
        ));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn validate_defaults_steps_to_the_resolved_model() {
        let root = temp_root("steps");
        let orchestrator = test_orchestrator(root.as_path());

        let fast = orchestrator
            .validate(&prompt_request(&["raster"]))
            .expect("default model should validate");
        assert_eq!(fast.model.id, "fast");
        assert_eq!(fast.steps, fast.model.default_steps);

        let quality = GenerateRequest {
            model: Some(String::from("quality")),
            ..prompt_request(&["raster"])
        };
        let quality = orchestrator
            .validate(&quality)
            .expect("quality model should validate");
        assert_eq!(quality.steps, quality.model.default_steps);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn validate_applies_template_negative_and_preset_defaults() {
        let root = temp_root("template");
        let orchestrator = test_orchestrator(root.as_path());
        let request = GenerateRequest {
            prompt: Some(String::from("mountain peak")),
            template: Some(String::from("logo_template")),
            outputs: vec![String::from("raster"), String::from("vector")],
            ..GenerateRequest::default()
        };

        let validated = orchestrator
            .validate(&request)
            .expect("templated request should validate");

        assert!(validated.prompt.contains("mountain peak"));
        assert!(validated.negative_prompt.is_some());
        let preset = validated.svg_preset.expect("template supplies the preset");
        let template = ParameterCatalog::builtin()
            .template("logo_template")
            .expect("template exists");
        assert_eq!(preset.id, template.svg_preset);
        assert_eq!(validated.template.as_deref(), Some("logo_template"));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn validate_requires_an_svg_preset_for_vector_output() {
        let root = temp_root("preset");
        let orchestrator = test_orchestrator(root.as_path());
        let request = prompt_request(&["vector"]);

        let err = orchestrator
            .validate(&request)
            .expect_err("vector without preset should be rejected");
        assert_eq!(
            err,
            RunRejection::Validation(String::from("vector output requires an svg_preset"))
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn validate_surfaces_unknown_references_as_not_found() {
        let root = temp_root("refs");
        let orchestrator = test_orchestrator(root.as_path());

        let unknown_model = GenerateRequest {
            model: Some(String::from("turbo-xl")),
            ..prompt_request(&["raster"])
        };
        let err = orchestrator
            .validate(&unknown_model)
            .expect_err("unknown model should be rejected");
        assert_eq!(
            err,
            RunRejection::NotFound {
                kind: "model",
                identifier: String::from("turbo-xl"),
            }
        );

        let unknown_lora = GenerateRequest {
            lora: Some(String::from("missing-weights")),
            ..prompt_request(&["raster"])
        };
        let err = orchestrator
            .validate(&unknown_lora)
            .expect_err("unknown lora should be rejected");
        assert_eq!(
            err,
            RunRejection::NotFound {
                kind: "lora",
                identifier: String::from("missing-weights"),
            }
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn validate_checks_reference_image_pairings() {
        let root = temp_root("pairings");
        let orchestrator = test_orchestrator(root.as_path());

        let strength_without_face = GenerateRequest {
            image_strength: Some(0.5),
            ..prompt_request(&["raster"])
        };
        assert!(matches!(
            orchestrator.validate(&strength_without_face),
            Err(RunRejection::Validation(_))
        ));

        let face_with_image = GenerateRequest {
            image: Some(STANDARD.encode(tiny_png())),
            face_reference: Some(STANDARD.encode(tiny_png())),
            outputs: vec![String::from("raster")],
            ..GenerateRequest::default()
        };
        assert!(matches!(
            orchestrator.validate(&face_with_image),
            Err(RunRejection::Validation(_))
        ));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn prepare_prompts_takes_the_style_negative_when_request_has_none() {
        let root = temp_root("prompts");
        let orchestrator = test_orchestrator(root.as_path());
        let request = GenerateRequest {
            enhance_style: Some(String::from("logo")),
            ..prompt_request(&["raster"])
        };

        let validated = orchestrator
            .validate(&request)
            .expect("styled request should validate");
        let prompts = orchestrator.prepare_prompts(&validated);

        assert!(prompts.prompt.starts_with("angular fox emblem"));
        assert!(prompts.prompt.len() > validated.prompt.len());
        assert!(!prompts.optimizations.is_empty());
        let style = validated.enhance_style.expect("style resolved");
        assert_eq!(prompts.negative.as_deref(), Some(style.negative));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn execute_completes_conversion_only_raster_requests_without_tools() {
        let root = temp_root("convert");
        let orchestrator = test_orchestrator(root.as_path());
        let request = GenerateRequest {
            image: Some(STANDARD.encode(tiny_png())),
            outputs: vec![String::from("raster")],
            ..GenerateRequest::default()
        };
        let run_id = Uuid::new_v4();
        let state = RunStateCell::new();
        let cancel = CancelToken::new();

        let result = orchestrator
            .execute(run_id, &request, &state, &cancel)
            .expect("conversion run should not be rejected");

        assert_eq!(result.status, "complete");
        assert_eq!(state.current(), RunState::Complete);
        assert_eq!(result.request.mode, "conversion");
        match result.outputs.get("raster").expect("raster entry") {
            OutputEntry::Artifact {
                filename,
                url,
                content_kind,
            } => {
                assert!(filename.ends_with("_raster.png"));
                assert_eq!(url.as_str(), format!("/api/outputs/{filename}").as_str());
                assert_eq!(*content_kind, "raster-png");
                assert!(root.join("outputs").join(filename).is_file());
            }
            OutputEntry::Failed { .. } => panic!("raster should persist"),
        }

        let listed = orchestrator
            .history
            .list(&HistoryQuery::default())
            .expect("history should list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, "complete");
        assert_eq!(listed[0].prompt, "");

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn execute_records_failed_synthesis_runs_in_history() {
        let root = temp_root("failed");
        let orchestrator = test_orchestrator(root.as_path());
        let request = prompt_request(&["raster"]);
        let state = RunStateCell::new();
        let cancel = CancelToken::new();

        let result = orchestrator
            .execute(Uuid::new_v4(), &request, &state, &cancel)
            .expect("a failed run is a result, not a rejection");

        assert_eq!(result.status, "failed");
        assert_eq!(state.current(), RunState::Failed);
        assert!(result.outputs.is_empty());
        let error = result.error.expect("failure detail should be attached");
        assert_eq!(error.stage, "synthesizing");
        assert_eq!(error.kind, "tool_failure");

        let listed = orchestrator
            .history
            .list(&HistoryQuery::default())
            .expect("history should list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, "failed");
        assert_eq!(listed[0].failure_stage.as_deref(), Some("synthesizing"));
        assert_eq!(listed[0].failure_kind.as_deref(), Some("tool_failure"));

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn execute_fails_cancelled_runs_with_the_cancelled_kind() {
        let root = temp_root("cancelled");
        let orchestrator = test_orchestrator(root.as_path());
        let request = prompt_request(&["raster"]);
        let state = RunStateCell::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = orchestrator
            .execute(Uuid::new_v4(), &request, &state, &cancel)
            .expect("cancelled run still yields a result");

        assert_eq!(result.status, "failed");
        let error = result.error.expect("cancellation detail");
        assert_eq!(error.kind, "cancelled");
        assert_eq!(state.current(), RunState::Failed);

        let _ = std::fs::remove_dir_all(root);
    }
}
