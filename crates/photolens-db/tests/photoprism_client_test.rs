//! Integration tests for the PhotoPrism metadata client against a mock server.

use std::time::Duration;

use photolens_db::{fetch_all_photos, Error, MetadataService, NewMarker, PhotoPrismClient, PhotoQuery, RelBox};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> PhotoPrismClient {
    PhotoPrismClient::new(server.uri(), Some("secret".to_string()), Duration::from_secs(5))
        .expect("client")
}

#[tokio::test]
async fn test_get_photo_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/photos/pq1"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "UID": "pq1",
            "Title": "Harbor",
            "Files": [{"UID": "f1", "Hash": "abc", "Primary": true, "Width": 1200, "Height": 800, "Orientation": 1}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let photo = client(&server).get_photo("pq1").await.unwrap();
    assert_eq!(photo.title, "Harbor");
    assert_eq!(photo.file_hash, "abc");
    assert_eq!(photo.width, 1200);
}

#[tokio::test]
async fn test_missing_photo_maps_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/photos/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
        .mount(&server)
        .await;

    let err = client(&server).get_photo("nope").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_server_error_maps_to_metadata_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/albums"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(&server).list_albums(10, 0).await.unwrap_err();
    match err {
        Error::Metadata(msg) => assert!(msg.contains("500")),
        other => panic!("expected metadata error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_markers_flattened_across_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/photos/pq1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "UID": "pq1",
            "Files": [
                {"UID": "f1", "Primary": true, "Markers": [
                    {"UID": "m1", "Type": "face", "X": 0.1, "Y": 0.1, "W": 0.2, "H": 0.2, "Name": "Alice", "SubjUID": "js1"}
                ]},
                {"UID": "f2", "Markers": [
                    {"UID": "m2", "FileUID": "f2", "Type": "face", "X": 0.5, "Y": 0.5, "W": 0.1, "H": 0.1}
                ]}
            ]
        })))
        .mount(&server)
        .await;

    let markers = client(&server).get_photo_markers("pq1").await.unwrap();
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].file_uid, "f1");
    assert!(markers[0].is_assigned());
    assert!(!markers[1].is_assigned());
}

#[tokio::test]
async fn test_list_photos_pages_with_album_filter() {
    let server = MockServer::start().await;
    let page: Vec<_> = (0..3)
        .map(|i| json!({"UID": format!("p{}", i), "FileUID": "f", "Hash": "h"}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/v1/photos"))
        .and(query_param("s", "alb1"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(page)))
        .expect(1)
        .mount(&server)
        .await;

    let photos = fetch_all_photos(&client(&server), &PhotoQuery::album("alb1"))
        .await
        .unwrap();
    assert_eq!(photos.len(), 3);
}

#[tokio::test]
async fn test_create_marker_posts_relative_box() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/markers"))
        .and(body_partial_json(json!({"FileUID": "f1", "Type": "face", "Name": "Alice", "X": 0.25})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "UID": "m9", "FileUID": "f1", "Type": "face",
            "X": 0.25, "Y": 0.1, "W": 0.1, "H": 0.2, "Name": "Alice", "SubjUID": "js1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let marker = client(&server)
        .create_marker(NewMarker {
            photo_uid: "pq1".to_string(),
            file_uid: "f1".to_string(),
            rel_box: RelBox::new(0.25, 0.1, 0.1, 0.2),
            subject_name: Some("Alice".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(marker.uid, "m9");
    assert_eq!(marker.subject_uid, "js1");
}

#[tokio::test]
async fn test_unassign_marker_subject() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/markers/m1/subject"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"UID": "m1", "Type": "face"})))
        .expect(1)
        .mount(&server)
        .await;

    let marker = client(&server).unassign_marker_subject("m1").await.unwrap();
    assert!(!marker.is_assigned());
}

#[tokio::test]
async fn test_download_file_returns_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/dl/hash1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff]))
        .mount(&server)
        .await;

    let bytes = client(&server).download_file("hash1").await.unwrap();
    assert_eq!(bytes, vec![0xff, 0xd8, 0xff]);
}

#[tokio::test]
async fn test_add_photo_label() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/photos/pq1/label"))
        .and(body_partial_json(json!({"Name": "Beach", "Uncertainty": 20})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"UID": "pq1"})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .add_photo_label("pq1", "Beach", 20)
        .await
        .unwrap();
}
