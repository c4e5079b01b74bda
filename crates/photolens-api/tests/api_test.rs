//! HTTP-level tests: the router is served on an ephemeral port and driven
//! with reqwest against in-memory collaborators.

use std::sync::Arc;

use photolens_api::{router, AppState};
use photolens_core::{Album, FaceIndex, Photo, PixelBox, StoredFace};
use photolens_db::{MemoryFaceIndex, MemoryImageIndex, MemoryMetadata};
use photolens_inference::mock::MockEmbeddingService;
use serde_json::{json, Value};

async fn spawn_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn photo(uid: &str) -> Photo {
    Photo {
        uid: uid.to_string(),
        title: uid.to_string(),
        file_uid: format!("f-{}", uid),
        file_hash: format!("h-{}", uid),
        width: 800,
        height: 600,
        orientation: 1,
        ..Default::default()
    }
}

async fn library(embeddings: MockEmbeddingService) -> AppState {
    let metadata = Arc::new(MemoryMetadata::new());
    for uid in ["p1", "p2", "p3"] {
        metadata.add_photo(photo(uid)).await;
        metadata
            .add_file(&format!("h-{}", uid), uid.as_bytes().to_vec())
            .await;
    }
    metadata
        .add_album(
            Album {
                uid: "al1".to_string(),
                title: "Trip".to_string(),
                album_type: "album".to_string(),
                photo_count: 3,
            },
            &["p1", "p2", "p3"],
        )
        .await;

    let faces = Arc::new(MemoryFaceIndex::new());
    faces
        .save_faces(
            "p9",
            vec![StoredFace {
                photo_uid: "p9".to_string(),
                vector: vec![1.0, 0.0],
                bbox: PixelBox::new(10.0, 10.0, 200.0, 200.0),
                subject_name: "Grace".to_string(),
                subject_uid: "js-grace".to_string(),
                marker_uid: "mk-p9".to_string(),
                photo_width: 800,
                photo_height: 600,
                orientation: 1,
                ..Default::default()
            }],
        )
        .await
        .unwrap();

    AppState::new()
        .with_metadata(metadata)
        .with_embeddings(Arc::new(embeddings.with_image_dim(4)))
        .with_indexes(Arc::new(MemoryImageIndex::new()), faces)
        .with_job_concurrency(1)
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (u16, Value) {
    let response = client.post(url).json(&body).send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_health_reports_collaborators() {
    let base = spawn_server(AppState::new()).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["index"], false);
    assert_eq!(body["metadata"], false);
    assert!(body.get("image_embeddings").is_none());

    let base = spawn_server(library(MockEmbeddingService::new()).await).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["index"], true);
    assert_eq!(body["face_embeddings"], 1);
}

#[tokio::test]
async fn test_missing_index_is_service_unavailable() {
    let base = spawn_server(AppState::new()).await;
    let client = reqwest::Client::new();
    let (status, body) = post(
        &client,
        format!("{}/faces/match", base),
        json!({"person_name": "Grace"}),
    )
    .await;
    assert_eq!(status, 503);
    assert!(body["error"].as_str().unwrap().contains("Vector index"));
}

#[tokio::test]
async fn test_match_validation_and_empty_person() {
    let base = spawn_server(library(MockEmbeddingService::new()).await).await;
    let client = reqwest::Client::new();

    let (status, body) = post(&client, format!("{}/faces/match", base), json!({"person_name": " "})).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "person_name is required");

    let (status, body) = post(&client, format!("{}/faces/match", base), json!({"limit": 3})).await;
    assert_eq!(status, 400);
    assert!(body["error"].is_string());

    let (status, body) = post(
        &client,
        format!("{}/faces/match", base),
        json!({"person_name": "Nobody", "threshold": 0.4}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["source_faces"], 0);
    assert_eq!(body["matches"], json!([]));
    assert_eq!(body["summary"]["create_marker"], 0);

    let (status, body) = post(
        &client,
        format!("{}/faces/outliers", base),
        json!({"person_name": "Grace"}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["total_faces"], 1);
}

#[tokio::test]
async fn test_photo_endpoints_errors() {
    let base = spawn_server(library(MockEmbeddingService::new()).await).await;
    let client = reqwest::Client::new();

    let (status, _) = post(&client, format!("{}/photos/similar", base), json!({"photo_uid": "p1"})).await;
    assert_eq!(status, 404);

    let (status, body) = post(
        &client,
        format!("{}/photos/similar-to-collection", base),
        json!({"source_type": "folder", "source_id": "x"}),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("source_type"));

    let (status, body) = post(&client, format!("{}/photos/duplicates", base), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["total_groups"], 0);
    assert_eq!(body["duplicate_groups"], json!([]));
}

#[tokio::test]
async fn test_process_job_lifecycle() {
    let base = spawn_server(library(MockEmbeddingService::new()).await).await;
    let client = reqwest::Client::new();

    let response = client.post(format!("{}/process", base)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 202);
    let started: Value = response.json().await.unwrap();
    let id = started["job_id"].as_str().unwrap().to_string();

    let stream = client
        .get(format!("{}/process/{}/events", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(
        stream.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    let text = stream.text().await.unwrap();
    assert!(text.contains("event: completed"));
    assert!(!text.contains("event: cancelled"));

    let snapshot: Value = client
        .get(format!("{}/process/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["result"]["embeddings_created"], 3);
    assert_eq!(snapshot["result"]["total"], 3);

    let missing = client
        .get(format!("{}/process/does-not-exist", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn test_second_process_job_conflicts_then_cancel() {
    let slow = MockEmbeddingService::new().with_latency_ms(300);
    let base = spawn_server(library(slow).await).await;
    let client = reqwest::Client::new();

    let (status, started) = post(&client, format!("{}/process", base), json!({"faces": false})).await;
    assert_eq!(status, 202);
    let id = started["job_id"].as_str().unwrap().to_string();

    let (status, body) = post(&client, format!("{}/process", base), json!({})).await;
    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains(&id));

    let cancelled: Value = client
        .delete(format!("{}/process/{}", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancelled["cancelled"], true);

    let text = client
        .get(format!("{}/process/{}/events", base, id))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("event: cancelled"));
    // Nothing follows the terminal frame.
    let tail = text.rsplit("event: ").next().unwrap();
    assert!(tail.starts_with("cancelled"));
}

#[tokio::test]
async fn test_sort_requires_labels() {
    let base = spawn_server(library(MockEmbeddingService::new()).await).await;
    let client = reqwest::Client::new();

    let (status, body) = post(
        &client,
        format!("{}/sort", base),
        json!({"album_uid": "al1", "labels": []}),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("label"));

    let (status, started) = post(
        &client,
        format!("{}/sort", base),
        json!({"album_uid": "al1", "labels": ["beach"], "dry_run": true}),
    )
    .await;
    assert_eq!(status, 202);
    let id = started["job_id"].as_str().unwrap();
    let text = client
        .get(format!("{}/sort/{}/events", base, id))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("event: completed"));
}

#[tokio::test]
async fn test_openapi_document() {
    let base = spawn_server(AppState::new()).await;
    let doc: Value = reqwest::get(format!("{}/openapi.json", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/faces/match"]["post"].is_object());
    assert!(doc["paths"]["/process/{id}"]["delete"].is_object());
}
