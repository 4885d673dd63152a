//! Router-level tests driven with `tower::ServiceExt::oneshot`.
//!
//! No worker processes are spawned: these exercise the validation and
//! no-resource paths plus the read-only endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use remgo_api::config::ServerConfig;
use remgo_api::engine::TaskCoordinator;
use remgo_api::state::AppState;
use remgo_api::{routes, ws};
use remgo_core::gpu_config::{GpuConfigFile, GpuEntry};
use remgo_core::scheduler::GpuScheduler;
use remgo_db::MetadataStore;
use remgo_worker::{WorkerCommand, WorkerSupervisor};

/// Build a full router over temp directories.
///
/// `gpu_weights` controls the slot table; no worker processes exist, so
/// dispatch against these slots fails fast.
async fn test_app(gpu_weights: &[u32]) -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let outputs_dir = dir.path().join("outputs");
    std::fs::create_dir_all(&outputs_dir).unwrap();

    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        cors_origins: vec!["*".into()],
        request_timeout_secs: 5,
        outputs_dir: outputs_dir.clone(),
        checkpoints_dir: dir.path().join("checkpoints"),
        loras_dir: dir.path().join("loras"),
        vaes_dir: dir.path().join("vae"),
        styles_dir: dir.path().join("styles"),
        presets_dir: dir.path().join("presets"),
        gpu_config_path: dir.path().join("gpu_config.json"),
        worker_command: "true".into(),
        worker_base_port: 9000,
        config_doc_path: dir.path().join("config.txt"),
        config_tutorial_path: dir.path().join("config_modification_tutorial.txt"),
        subtask_timeout_secs: 60,
    };

    let gpu_config = GpuConfigFile {
        enabled: !gpu_weights.is_empty(),
        distribute: true,
        gpus: gpu_weights
            .iter()
            .enumerate()
            .map(|(i, &w)| GpuEntry {
                device: i as u32,
                name: None,
                weight: w,
            })
            .collect(),
    };
    let scheduler = Arc::new(GpuScheduler::new(&gpu_config, 9000));

    // No slots are handed to the supervisor: no child processes in tests.
    let supervisor = WorkerSupervisor::start(
        WorkerCommand {
            program: "true".into(),
            args: vec![],
        },
        &[],
    )
    .await;

    let ws_manager = Arc::new(ws::WsManager::new());
    let coordinator = TaskCoordinator::new(
        Arc::clone(&scheduler),
        Arc::clone(&supervisor),
        Arc::clone(&ws_manager),
        Duration::from_secs(60),
    );

    let state = AppState {
        config: Arc::new(config),
        scheduler,
        supervisor,
        coordinator,
        ws_manager,
        metadata: Arc::new(MetadataStore::new(outputs_dir.join("metadata.db"))),
    };

    (routes::router(&outputs_dir).with_state(state), dir)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _dir) = test_app(&[]).await;
    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn gpus_reflect_slot_table() {
    let (app, _dir) = test_app(&[3, 1]).await;
    let (status, body) = get_json(&app, "/gpus").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["multi_gpu_enabled"], json!(true));
    assert_eq!(body["gpu_count"], json!(2));
    assert_eq!(body["gpus"][0]["weight"], json!(3));
    assert_eq!(body["gpus"][1]["device"], json!(1));
    assert_eq!(body["gpus"][0]["busy"], json!(false));
}

#[tokio::test]
async fn settings_payload_shape() {
    let (app, _dir) = test_app(&[1]).await;
    let (status, body) = get_json(&app, "/settings").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vaes"][0], json!("Default (model)"));
    assert_eq!(body["clip_skip_max"], json!(12));
    assert_eq!(body["default_lora_count"], json!(5));
    assert_eq!(
        body["refiner_swap_methods"],
        json!(["joint", "separate", "vae"])
    );
    assert_eq!(body["metadata_schemes"], json!(["fooocus", "a1111"]));
    assert!(body["aspect_ratios"]
        .as_array()
        .unwrap()
        .contains(&json!("1152×896")));
    assert!(body["styles"]
        .as_array()
        .unwrap()
        .contains(&json!("Fooocus V2")));
}

#[tokio::test]
async fn generate_without_gpus_is_a_task_error() {
    let (app, _dir) = test_app(&[]).await;
    let (status, body) = post_json(&app, "/generate", json!({"prompt": "a cat"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("Error"));
    assert!(body["error"].as_str().unwrap().contains("No GPU"));
    assert!(body["task_id"].is_string());
}

#[tokio::test]
async fn generate_rejects_wrong_length_args_override() {
    let (app, _dir) = test_app(&[1]).await;
    let (status, body) = post_json(
        &app,
        "/generate",
        json!({"prompt": "a cat", "fooocus_args": [false, "a cat", ""]}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    assert!(body["error"].as_str().unwrap().contains("152"));
}

#[tokio::test]
async fn status_of_unknown_task_is_404() {
    let (app, _dir) = test_app(&[1]).await;
    let (status, body) = get_json(&app, "/status/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn status_of_failed_task_is_queryable() {
    let (app, _dir) = test_app(&[]).await;
    let (_, body) = post_json(&app, "/generate", json!({"prompt": "a cat"})).await;
    let task_id = body["task_id"].as_str().unwrap();

    let (status, body) = get_json(&app, &format!("/status/{task_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("error"));
    assert_eq!(body["statusText"], json!("No GPU available"));
}

#[tokio::test]
async fn generate_with_dead_workers_finalizes_as_error() {
    // A slot table exists but no worker process does: every dispatch
    // fails, and the polling loop closes the task out as an error with
    // exactly one terminal state and a released slot.
    let (app, _dir) = test_app(&[2, 1]).await;
    let (status, body) = post_json(&app, "/generate", json!({"prompt": "a cat", "image_number": 3})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("Started"));
    assert_eq!(body["total_images"], json!(3));
    let task_id = body["task_id"].as_str().unwrap().to_string();

    // Both slots are parked while the task is live.
    let (_, gpus) = get_json(&app, "/gpus").await;
    assert_eq!(gpus["gpus"][0]["busy"], json!(true));

    // First poll tick is at 500 ms; give it room.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (status, body) = get_json(&app, &format!("/status/{task_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("error"));
    assert_eq!(body["percentage"], json!(100));
    assert_eq!(body["statusText"], json!("Finished (0/3 images)"));
    assert!(!body["errors"].as_array().unwrap().is_empty());

    let (_, gpus) = get_json(&app, "/gpus").await;
    assert_eq!(gpus["gpus"][0]["busy"], json!(false));
    assert_eq!(gpus["gpus"][1]["busy"], json!(false));
}

#[tokio::test]
async fn stop_with_nothing_running_is_a_noop() {
    let (app, _dir) = test_app(&[1]).await;
    let (status, body) = post_json(&app, "/stop", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requested"], json!(0));
    assert_eq!(body["success"], json!(true));
}

#[tokio::test]
async fn history_lists_outputs_newest_first_without_sidecar() {
    let (app, dir) = test_app(&[1]).await;
    let outputs = dir.path().join("outputs");
    std::fs::write(outputs.join("2024-03-01_10-00-00_0001.png"), b"x").unwrap();
    std::fs::create_dir_all(outputs.join("2024-03-02")).unwrap();
    std::fs::write(
        outputs.join("2024-03-02").join("2024-03-02_09-00-00_0001.png"),
        b"x",
    )
    .unwrap();

    let (status, body) = get_json(&app, "/history?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(2));
    let items = body["items"].as_array().unwrap();
    assert_eq!(items[0]["filename"], json!("2024-03-02_09-00-00_0001.png"));
    assert_eq!(items[0]["metadata"], json!(null));
    assert_eq!(body["page"], json!(1));
    assert_eq!(body["total_pages"], json!(1));
}

#[tokio::test]
async fn config_editor_round_trip() {
    let (app, dir) = test_app(&[1]).await;
    std::fs::write(
        dir.path().join("config_modification_tutorial.txt"),
        "Edit config.txt like this:\n{\n  \"default_cfg_scale\": 7.0,\n  \"default_sampler\": \"dpmpp_2m_sde_gpu\"\n}\n",
    )
    .unwrap();

    let (status, body) = get_json(&app, "/config/editor").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["schema"]["default_cfg_scale"].is_number());

    let (status, body) =
        post_json(&app, "/config/editor", json!({"default_cfg_scale": 3.0})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], json!(1));
    assert_eq!(body["restart_required"], json!(true));

    // Unknown keys are refused.
    let (status, body) = post_json(&app, "/config/editor", json!({"bogus": 1})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    assert!(body["error"].as_str().unwrap().contains("bogus"));
}
