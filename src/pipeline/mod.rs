pub mod gate;
pub mod orchestrator;
pub mod runtime;
pub mod service;
pub mod stage_adapters;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Validating,
    Enhancing,
    Synthesizing,
    LoadingInput,
    Preprocessing,
    FanningOut,
    Aggregating,
    Complete,
    Partial,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Enhancing => "enhancing",
            Self::Synthesizing => "synthesizing",
            Self::LoadingInput => "loading_input",
            Self::Preprocessing => "preprocessing",
            Self::FanningOut => "fanning_out",
            Self::Aggregating => "aggregating",
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Partial | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        use RunState::{
            Aggregating, Complete, Enhancing, Failed, FanningOut, LoadingInput, Partial,
            Preprocessing, Synthesizing, Validating,
        };

        matches!(
            (self, next),
            (Validating, Enhancing)
                | (Validating, Failed)
                | (Enhancing, Synthesizing)
                | (Enhancing, LoadingInput)
                | (Enhancing, Failed)
                | (Synthesizing, Preprocessing)
                | (Synthesizing, Failed)
                | (LoadingInput, Preprocessing)
                | (LoadingInput, Failed)
                | (Preprocessing, FanningOut)
                | (Preprocessing, Failed)
                | (FanningOut, Aggregating)
                | (FanningOut, Failed)
                | (Aggregating, Complete)
                | (Aggregating, Partial)
                | (Aggregating, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputKind {
    Raster,
    Vector,
    Edge,
    Depth,
    Saliency,
}

impl OutputKind {
    /// Fan-out invocation order for the kinds produced beyond the raster.
    pub const FAN_OUT_ORDER: [Self; 4] = [Self::Vector, Self::Edge, Self::Depth, Self::Saliency];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raster => "raster",
            Self::Vector => "vector",
            Self::Edge => "edge",
            Self::Depth => "depth",
            Self::Saliency => "saliency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raster" => Some(Self::Raster),
            "vector" => Some(Self::Vector),
            "edge" => Some(Self::Edge),
            "depth" => Some(Self::Depth),
            "saliency" => Some(Self::Saliency),
            _ => None,
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Vector => "svg",
            _ => "png",
        }
    }

    pub fn content_kind(self) -> ContentKind {
        match self {
            Self::Raster => ContentKind::RasterPng,
            Self::Vector => ContentKind::VectorSvg,
            Self::Edge | Self::Depth | Self::Saliency => ContentKind::MapPng,
        }
    }

    /// Stage label used in durations and failure attribution for fan-out work.
    pub fn stage_label(self) -> &'static str {
        match self {
            Self::Raster => "preprocessing",
            Self::Vector => "vectorizing",
            Self::Edge => "extract_edge",
            Self::Depth => "extract_depth",
            Self::Saliency => "extract_saliency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    RasterPng,
    VectorSvg,
    MapPng,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RasterPng => "raster-png",
            Self::VectorSvg => "vector-svg",
            Self::MapPng => "map-png",
        }
    }
}

/// Handle to one stage's produced bytes inside a run's working area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageArtifact {
    pub path: PathBuf,
    pub content_kind: ContentKind,
    pub produced_by: &'static str,
}

/// Classified failure kinds recorded against a run or a single output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidInput,
    ToolFailure,
    Timeout,
    ResourceTimeout,
    Cancelled,
    Io,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ToolFailure => "tool_failure",
            Self::Timeout => "timeout",
            Self::ResourceTimeout => "resource_timeout",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

/// Shared view of one run's position in the state machine. Moves are checked
/// against the transition table; an illegal move is refused and logged.
#[derive(Debug, Clone)]
pub struct RunStateCell {
    state: Arc<Mutex<RunState>>,
}

impl RunStateCell {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RunState::Validating)),
        }
    }

    pub fn current(&self) -> RunState {
        *self.state.lock().expect("run state mutex poisoned")
    }

    pub fn advance(&self, next: RunState) {
        let mut state = self.state.lock().expect("run state mutex poisoned");
        if state.can_transition_to(next) {
            *state = next;
        } else {
            tracing::error!(
                from = state.as_str(),
                to = next.as_str(),
                "refused illegal run state transition"
            );
        }
    }
}

impl Default for RunStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation flag checked at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
