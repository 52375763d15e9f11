use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use kontur_backend_core::api::routes::route_catalog;
use kontur_backend_core::api::server::build_router_with_settings;
use kontur_backend_core::config::BackendSettings;
use kontur_backend_core::contract::HttpMethod;
use kontur_backend_core::pipeline::stage_adapters::StageToolchain;

#[tokio::test]
async fn every_contract_route_is_http_mounted() {
    let app = build_router_with_settings(&test_settings());

    for spec in route_catalog() {
        let request_path = materialize_path(spec.path.as_str());
        let request = Request::builder()
            .method(to_http_method(spec.method))
            .uri(request_path)
            .header("content-type", "application/json")
            .body(request_body(spec.method))
            .expect("request should build");

        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("router should return response");

        let status = response.status();
        let expected = expected_status(spec.method, spec.path.as_str());
        assert_eq!(
            status, expected,
            "unexpected status for {} {}",
            spec.method, spec.path
        );
    }
}

#[tokio::test]
async fn health_reports_the_service_identity() {
    let app = build_router_with_settings(&test_settings());

    let request = Request::builder()
        .method(Method::GET)
        .uri("/health")
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let payload: Value = serde_json::from_slice(body.as_ref()).expect("valid JSON");

    assert_eq!(payload["ok"], json!(true));
    assert_eq!(payload["data"]["status"], json!("ok"));
    assert_eq!(payload["data"]["service"], json!("kontur-backend-core"));
    assert_eq!(payload["data"]["route_count"], json!(15));
    assert_eq!(payload["data"]["catalog_version"], json!("2025.08.1"));
    assert!(payload["data"]["started_unix_ms"].is_u64());
}

#[tokio::test]
async fn unknown_paths_fall_through_to_404() {
    let app = build_router_with_settings(&test_settings());

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/definitely-not-a-route")
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn to_http_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Options => Method::OPTIONS,
        HttpMethod::Head => Method::HEAD,
    }
}

fn request_body(method: HttpMethod) -> Body {
    match method {
        HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => Body::from("{}"),
        _ => Body::empty(),
    }
}

fn materialize_path(path_template: &str) -> String {
    let mut output = String::with_capacity(path_template.len());
    let mut in_param = false;

    for ch in path_template.chars() {
        match ch {
            '{' => {
                in_param = true;
                output.push('x');
            }
            '}' => in_param = false,
            _ if in_param => {}
            _ => output.push(ch),
        }
    }

    output
}

fn expected_status(method: HttpMethod, path: &str) -> StatusCode {
    match (method, path) {
        (HttpMethod::Get, "/health") => StatusCode::OK,
        (HttpMethod::Post, "/api/generate") => StatusCode::BAD_REQUEST,
        (HttpMethod::Get, "/api/runs") => StatusCode::OK,
        (HttpMethod::Post, "/api/runs/{runId}/cancel") => StatusCode::BAD_REQUEST,
        (HttpMethod::Get, "/api/history") => StatusCode::OK,
        (HttpMethod::Get, "/api/models") => StatusCode::OK,
        (HttpMethod::Get, "/api/loras") => StatusCode::OK,
        (HttpMethod::Post, "/api/loras") => StatusCode::BAD_REQUEST,
        (HttpMethod::Get, "/api/catalog/presets") => StatusCode::OK,
        (HttpMethod::Get, "/api/catalog/templates") => StatusCode::OK,
        (HttpMethod::Get, "/api/catalog/templates/{templateId}/apply") => StatusCode::BAD_REQUEST,
        (HttpMethod::Get, "/api/catalog/styles") => StatusCode::OK,
        (HttpMethod::Get, "/api/catalog/prompts") => StatusCode::OK,
        (HttpMethod::Post, "/api/enhance") => StatusCode::BAD_REQUEST,
        (HttpMethod::Get, "/api/outputs/{filename}") => StatusCode::NOT_FOUND,
        _ => StatusCode::NOT_IMPLEMENTED,
    }
}

fn test_settings() -> BackendSettings {
    let suffix = Uuid::new_v4().to_string();
    let root = std::env::temp_dir().join(format!("kontur_contract_test_{suffix}"));
    std::fs::create_dir_all(root.as_path()).expect("temp test root must be creatable");
    BackendSettings {
        bind: String::from("127.0.0.1:0"),
        data_root: root,
        toolchain: StageToolchain::default(),
        max_dimension: 2048,
        gate_max_hold: std::time::Duration::from_secs(60),
        lora_sync_on_start: false,
    }
}
