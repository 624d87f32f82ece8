//! Integration tests for the `/api/v1/grids` resource.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;

use gridgen_core::naming::{GRIDS_DIR, SAVED_CONFIG_FILE};

use common::{body_bytes, body_json, delete, get, FakeBackend, USER};

fn save_run(root: &std::path::Path, name: &str) {
    let dir = root.join(USER).join(GRIDS_DIR).join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(SAVED_CONFIG_FILE), "{}").unwrap();
}

/// Send `request` over a fresh run socket and collect every event until the
/// terminal one.
async fn run_over_socket(addr: std::net::SocketAddr, request: Value) -> Vec<Value> {
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/grids/run"))
        .await
        .unwrap();
    socket.send(Message::Text(request.to_string())).await.unwrap();
    collect_events(&mut socket).await
}

async fn collect_events<S>(socket: &mut S) -> Vec<Value>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(frame)) = socket.next().await {
            if let Message::Text(text) = frame {
                let event: Value = serde_json::from_str(&text).unwrap();
                let terminal = event.get("success").is_some() || event.get("error").is_some();
                events.push(event);
                if terminal {
                    break;
                }
            }
        }
    })
    .await
    .expect("run finished in time");
    events
}

fn small_request(vals: &str) -> Value {
    json!({
        "base_params": {"prompt": "a cat", "width": 32, "height": 24},
        "grid_axes": [{"mode": "seed", "vals": vals}],
        "output_folder_name": "socket-run",
    })
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_is_empty_for_new_user() {
    let test = common::build_test_app();
    let response = get(test.app.clone(), "/api/v1/grids/history").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"data": []}));
}

#[tokio::test]
async fn history_lists_saved_runs() {
    let test = common::build_test_app();
    save_run(test.output_dir(), "cats");

    let json = body_json(get(test.app.clone(), "/api/v1/grids/history").await).await;
    assert_eq!(json["data"], json!(["cats"]));
}

#[tokio::test]
async fn delete_history_forgets_run() {
    let test = common::build_test_app();
    save_run(test.output_dir(), "cats");

    let response = delete(test.app.clone(), "/api/v1/grids/history/cats").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let json = body_json(get(test.app.clone(), "/api/v1/grids/history").await).await;
    assert_eq!(json["data"], json!([]));
}

#[tokio::test]
async fn nested_history_is_listed_and_deleted_by_path() {
    let test = common::build_test_app();
    save_run(test.output_dir(), "animals/cats");

    let json = body_json(get(test.app.clone(), "/api/v1/grids/history").await).await;
    assert_eq!(json["data"], json!(["animals/cats"]));

    let response = delete(test.app.clone(), "/api/v1/grids/history/animals/cats").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn delete_unknown_history_returns_404() {
    let test = common::build_test_app();
    let response = delete(test.app.clone(), "/api/v1/grids/history/nothing").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Folder existence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exists_reports_cleaned_folder() {
    let test = common::build_test_app();

    let json = body_json(get(test.app.clone(), "/api/v1/grids/exists?folder=cats").await).await;
    assert_eq!(json["data"], json!({"folder": "Grids/cats", "exists": false}));

    std::fs::create_dir_all(test.output_dir().join(USER).join("Grids/cats")).unwrap();
    let json = body_json(get(test.app.clone(), "/api/v1/grids/exists?folder=cats").await).await;
    assert_eq!(json["data"]["exists"], true);
}

#[tokio::test]
async fn exists_rejects_empty_folder_name() {
    let test = common::build_test_app();
    let response = get(test.app.clone(), "/api/v1/grids/exists?folder=%2F%2F").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn exists_requires_folder_param() {
    let test = common::build_test_app();
    let response = get(test.app.clone(), "/api/v1/grids/exists").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Run socket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_socket_streams_cells_then_composite() {
    let test = common::build_test_app();
    let addr = common::spawn_server(test.app.clone()).await;

    let events = run_over_socket(addr, small_request("1,2")).await;

    assert_eq!(events[0]["status"]["phase"], "running");
    assert_eq!(events[0]["status"]["total_cells"], 2);
    let images: Vec<&Value> = events.iter().filter(|e| e.get("image").is_some()).collect();
    assert_eq!(images.len(), 3);
    let composite = images
        .iter()
        .find(|e| e["batch_index"] == "3")
        .expect("composite image event");
    assert_eq!(events.last().unwrap(), &json!({"success": "complete"}));
    assert_eq!(test.backend.call_count(), 2);

    // The event URL is served from the output directory.
    let url = composite["image"].as_str().unwrap();
    assert!(url.starts_with(&format!("/Output/{USER}/")), "unexpected url {url}");
    let response = get(test.app.clone(), url).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    let image = image::load_from_memory(&bytes).unwrap();
    assert!(image.width() > 2 * 32);
}

#[tokio::test]
async fn run_socket_reports_invalid_request() {
    let test = common::build_test_app();
    let addr = common::spawn_server(test.app.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/grids/run"))
        .await
        .unwrap();
    socket.send(Message::Text("not json".to_string())).await.unwrap();
    let events = collect_events(&mut socket).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["code"], "BAD_REQUEST");
    assert_eq!(test.backend.call_count(), 0);
}

#[tokio::test]
async fn run_socket_rejects_too_many_axes() {
    let test = common::build_test_app();
    let addr = common::spawn_server(test.app.clone()).await;

    let mut request = small_request("1,2");
    request["grid_axes"] = json!([
        {"mode": "seed", "vals": "1,2"},
        {"mode": "steps", "vals": "10,20"},
        {"mode": "cfgscale", "vals": "5,7"},
        {"mode": "sampler", "vals": "euler,ddim"},
    ]);
    let events = run_over_socket(addr, request).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["code"], "UNSUPPORTED_LAYOUT");
    assert_eq!(test.backend.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_frame_stops_the_run() {
    let hold = Arc::new(Semaphore::new(0));
    let test = common::build_test_app_with(FakeBackend::held_by(hold.clone()));
    let addr = common::spawn_server(test.app.clone()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/grids/run"))
        .await
        .unwrap();
    socket
        .send(Message::Text(small_request("1,2,3,4,5,6").to_string()))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while test.backend.call_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("two cells submitted");

    socket
        .send(Message::Text(json!({"cancel": true}).to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    hold.add_permits(6);

    let events = collect_events(&mut socket).await;
    assert_eq!(events.last().unwrap(), &json!({"success": "complete"}));
    assert!(events
        .iter()
        .any(|e| e["status"]["phase"] == "cancelled"));
    assert_eq!(test.backend.call_count(), 2);
}
