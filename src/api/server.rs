use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::handler_utils::{ok_reply, ApiReply};
use crate::api::routes::route_catalog;
use crate::catalog::ParameterCatalog;
use crate::config::{default_app_root, resolve_backend_settings, BackendSettings};
use crate::contract::{HttpMethod, RouteSpec};
use crate::db::history::HistoryStore;
use crate::db::loras::LoraStore;
use crate::db::resolve_db_config;
use crate::loras::LoraRegistry;
use crate::pipeline::gate::SynthesisGate;
use crate::pipeline::orchestrator::PipelineOrchestrator;
use crate::pipeline::service::GenerationService;
use crate::pipeline::runtime::StdPipelineCommandRunner;
use crate::pipeline::stage_adapters::{SharedStageAdapterOps, ToolStageAdapters};
use crate::storage::ArtifactStore;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub route_count: usize,
    pub catalog: ParameterCatalog,
    pub history: HistoryStore,
    pub loras: LoraRegistry,
    pub artifacts: ArtifactStore,
    pub generation: GenerationService,
}

impl AppState {
    /// Builds the full collaborator stack under the settings' data root.
    /// Store schemas are ensured here; a data root that cannot be prepared
    /// is fatal at startup.
    pub fn new(
        route_count: usize,
        settings: &BackendSettings,
        adapters: SharedStageAdapterOps,
    ) -> Self {
        let artifacts = ArtifactStore::new(settings.outputs_dir(), settings.work_dir());
        artifacts
            .ensure_layout()
            .expect("artifact layout should be created");

        let db_path = resolve_db_config(settings.data_root.as_path()).db_path;
        let history = HistoryStore::new(db_path.as_path());
        history
            .initialize()
            .expect("history store should initialize schema");
        let lora_store = LoraStore::new(db_path.as_path());
        lora_store
            .initialize()
            .expect("lora store should initialize schema");
        let loras = LoraRegistry::new(lora_store, settings.loras_dir());
        if settings.lora_sync_on_start {
            if let Err(error) = loras.sync_directory() {
                warn!(%error, "lora directory sync failed at startup");
            }
        }

        let catalog = ParameterCatalog::builtin();
        let orchestrator = PipelineOrchestrator::new(
            catalog,
            adapters,
            SynthesisGate::new(settings.gate_max_hold),
            artifacts.clone(),
            history.clone(),
            loras.clone(),
        )
        .with_max_dimension(settings.max_dimension);

        Self {
            service_name: "kontur-backend-core",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            route_count,
            catalog,
            history,
            loras,
            artifacts,
            generation: GenerationService::new(orchestrator),
        }
    }
}

pub fn build_router() -> Router {
    let app_root = default_app_root();
    let settings = resolve_backend_settings(app_root.as_path())
        .expect("backend settings should resolve");
    build_router_with_settings(&settings)
}

pub fn build_router_with_settings(settings: &BackendSettings) -> Router {
    let adapters: SharedStageAdapterOps = Arc::new(ToolStageAdapters::new(
        settings.toolchain.clone(),
        StdPipelineCommandRunner,
    ));
    build_router_with_stage_adapters(settings, adapters)
}

pub fn build_router_with_stage_adapters(
    settings: &BackendSettings,
    adapters: SharedStageAdapterOps,
) -> Router {
    let catalog = route_catalog();
    let state = AppState::new(catalog.len(), settings, adapters);
    build_router_with_catalog(catalog, state)
}

fn build_router_with_catalog(catalog: Vec<RouteSpec>, state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health_handler));

    for spec in catalog {
        if spec.method == HttpMethod::Get && spec.path == "/health" {
            continue;
        }
        let method_router = method_router_for(&spec);
        router = router.route(spec.path.as_str(), method_router);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn serve(addr: SocketAddr, settings: BackendSettings) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router_with_settings(&settings);
    info!(bind = %addr, "starting kontur-backend-core HTTP surface");
    axum::serve(listener, app).await
}

fn method_router_for(spec: &RouteSpec) -> MethodRouter<AppState> {
    match (spec.method, spec.path.as_str()) {
        (HttpMethod::Post, "/api/generate") => post(crate::api::generate::generate_handler),
        (HttpMethod::Get, "/api/runs") => get(crate::api::runs::list_runs_handler),
        (HttpMethod::Post, "/api/runs/{runId}/cancel") => {
            post(crate::api::runs::cancel_run_handler)
        }
        (HttpMethod::Get, "/api/history") => get(crate::api::history::list_history_handler),
        (HttpMethod::Get, "/api/models") => get(crate::api::catalog::list_models_handler),
        (HttpMethod::Get, "/api/loras") => get(crate::api::loras::list_loras_handler),
        (HttpMethod::Post, "/api/loras") => post(crate::api::loras::upload_lora_handler),
        (HttpMethod::Get, "/api/catalog/presets") => {
            get(crate::api::catalog::list_presets_handler)
        }
        (HttpMethod::Get, "/api/catalog/templates") => {
            get(crate::api::catalog::list_templates_handler)
        }
        (HttpMethod::Get, "/api/catalog/templates/{templateId}/apply") => {
            get(crate::api::catalog::apply_template_handler)
        }
        (HttpMethod::Get, "/api/catalog/styles") => get(crate::api::catalog::list_styles_handler),
        (HttpMethod::Get, "/api/catalog/prompts") => get(crate::api::catalog::list_prompts_handler),
        (HttpMethod::Post, "/api/enhance") => post(crate::api::enhance::enhance_handler),
        (HttpMethod::Get, "/api/outputs/{filename}") => {
            get(crate::api::outputs::download_output_handler)
        }
        (method, path) => panic!("contract route {method} {path} has no handler attached"),
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    started_unix_ms: u128,
    route_count: usize,
    catalog_version: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> ApiReply {
    ok_reply(HealthResponse {
        status: "ok",
        service: state.service_name,
        version: state.service_version,
        started_unix_ms: state.started_unix_ms,
        route_count: state.route_count,
        catalog_version: state.catalog.version(),
    })
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
