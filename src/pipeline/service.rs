use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use uuid::Uuid;

use crate::pipeline::orchestrator::{
    GenerateRequest, GenerationResult, PipelineOrchestrator, RunRejection,
};
use crate::pipeline::{CancelToken, RunStateCell};

#[derive(Debug, Clone)]
struct ActiveRun {
    state: RunStateCell,
    cancel: CancelToken,
    started_unix_ms: u64,
}

/// One row of the in-flight run listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSnapshot {
    pub run_id: String,
    pub state: &'static str,
    pub started_unix_ms: u64,
}

/// Front door for the pipeline: executes runs synchronously on the calling
/// thread while keeping a registry of in-flight runs for listing and
/// cancellation.
#[derive(Clone)]
pub struct GenerationService {
    orchestrator: Arc<PipelineOrchestrator>,
    active: Arc<Mutex<HashMap<Uuid, ActiveRun>>>,
}

impl GenerationService {
    pub fn new(orchestrator: PipelineOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs one request to its terminal state. Blocks until the run finishes;
    /// the HTTP layer wraps this in `spawn_blocking`.
    pub fn run(&self, request: &GenerateRequest) -> Result<GenerationResult, RunRejection> {
        let run_id = Uuid::new_v4();
        let entry = ActiveRun {
            state: RunStateCell::new(),
            cancel: CancelToken::new(),
            started_unix_ms: now_unix_ms(),
        };
        let state = entry.state.clone();
        let cancel = entry.cancel.clone();
        self.active
            .lock()
            .expect("run registry mutex poisoned")
            .insert(run_id, entry);

        let result = self.orchestrator.execute(run_id, request, &state, &cancel);

        self.active
            .lock()
            .expect("run registry mutex poisoned")
            .remove(&run_id);
        result
    }

    /// Snapshot of in-flight runs, oldest first.
    pub fn active_runs(&self) -> Vec<RunSnapshot> {
        let active = self.active.lock().expect("run registry mutex poisoned");
        let mut snapshots: Vec<RunSnapshot> = active
            .iter()
            .map(|(run_id, run)| RunSnapshot {
                run_id: run_id.to_string(),
                state: run.state.current().as_str(),
                started_unix_ms: run.started_unix_ms,
            })
            .collect();
        snapshots.sort_by(|a, b| {
            a.started_unix_ms
                .cmp(&b.started_unix_ms)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        snapshots
    }

    /// Flags a run for cancellation; the run observes the flag at its next
    /// suspension point. Unknown or already-finished runs return false.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let active = self.active.lock().expect("run registry mutex poisoned");
        match active.get(&run_id) {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
