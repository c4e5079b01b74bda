//! Face matching, outlier detection and action application against the
//! in-memory stores.

use std::sync::Arc;

use photolens_db::{MemoryFaceIndex, MemoryMetadata};
use photolens_search::{
    Action, ApplyRequest, FaceActionApplier, FaceIndex, FaceMatcher, Marker,
    MetadataService, OutlierDetector, Photo, PixelBox, RelBox, StoredFace,
};

fn face(photo: &str, index: u32, vector: Vec<f32>, subject: &str) -> StoredFace {
    StoredFace {
        photo_uid: photo.to_string(),
        face_index: index,
        vector,
        bbox: PixelBox::new(100.0, 100.0, 200.0, 200.0),
        det_score: 0.9,
        subject_name: subject.to_string(),
        subject_uid: if subject.is_empty() {
            String::new()
        } else {
            format!("js-{}", subject.to_lowercase())
        },
        marker_uid: if subject.is_empty() {
            String::new()
        } else {
            format!("mk-{}", photo)
        },
        file_uid: format!("f-{}", photo),
        photo_width: 1000,
        photo_height: 1000,
        orientation: 1,
    }
}

async fn library() -> Arc<MemoryFaceIndex> {
    let index = Arc::new(MemoryFaceIndex::new());
    // Ada's own photos; a3 has no vector but still counts as owned.
    index
        .save_faces("a1", vec![face("a1", 0, vec![1.0, 0.0, 0.0], "Ada")])
        .await
        .unwrap();
    index
        .save_faces("a2", vec![face("a2", 0, vec![0.95, 0.05, 0.0], "Ada")])
        .await
        .unwrap();
    index
        .save_faces(
            "a3",
            vec![
                face("a3", 0, vec![], "Ada"),
                face("a3", 1, vec![0.9, 0.1, 0.0], ""),
            ],
        )
        .await
        .unwrap();

    // Unlinked candidates.
    index
        .save_faces("c1", vec![face("c1", 0, vec![0.9, 0.1, 0.0], "")])
        .await
        .unwrap();
    let mut c2 = face("c2", 0, vec![0.85, 0.15, 0.0], "");
    c2.marker_uid = "mk-c2".to_string();
    index.save_faces("c2", vec![c2]).await.unwrap();
    index
        .save_faces("c3", vec![face("c3", 0, vec![0.8, 0.2, 0.0], "")])
        .await
        .unwrap();
    index
        .save_faces("far", vec![face("far", 0, vec![0.0, 0.0, 1.0], "")])
        .await
        .unwrap();
    index
}

#[tokio::test]
async fn test_match_classifies_candidates() {
    let index = library().await;
    let matcher = FaceMatcher::new(index);

    let response = matcher.find_matches("Ada", 0.5, 0).await.unwrap();
    assert_eq!(response.person, "Ada");
    assert_eq!(response.source_photos, 3);
    assert_eq!(response.source_faces, 2);

    let uids: Vec<&str> = response
        .matches
        .iter()
        .map(|m| m.photo_uid.as_str())
        .collect();
    assert_eq!(uids, vec!["c1", "c2", "c3"]);
    assert_eq!(response.matches[0].action, Action::CreateMarker);
    assert_eq!(response.matches[1].action, Action::AssignPerson);
    assert_eq!(response.matches[1].marker_uid, "mk-c2");
    assert_eq!(response.matches[0].match_count, 2);
    assert_eq!(response.summary.create_marker, 2);
    assert_eq!(response.summary.assign_person, 1);
    assert_eq!(response.summary.already_done, 0);

    let rel = response.matches[0].bbox_rel;
    assert!((rel.x - 0.1).abs() < 1e-9 && (rel.w - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn test_unknown_person_returns_empty_response() {
    let matcher = FaceMatcher::new(library().await);
    let response = matcher.find_matches("Nobody", 0.0, 10).await.unwrap();
    assert_eq!(response.source_photos, 0);
    assert_eq!(response.source_faces, 0);
    assert!(response.matches.is_empty());
    assert_eq!(response.summary.create_marker, 0);
}

#[tokio::test]
async fn test_person_without_vectors_returns_empty_matches() {
    let index = Arc::new(MemoryFaceIndex::new());
    index
        .save_faces("p1", vec![face("p1", 0, vec![], "Grace")])
        .await
        .unwrap();
    let response = FaceMatcher::new(index)
        .find_matches("Grace", 0.5, 0)
        .await
        .unwrap();
    assert_eq!(response.source_photos, 1);
    assert_eq!(response.source_faces, 0);
    assert!(response.matches.is_empty());
}

#[tokio::test]
async fn test_limit_truncates_ranked_matches() {
    let matcher = FaceMatcher::new(library().await);
    let response = matcher.find_matches("Ada", 0.5, 2).await.unwrap();
    assert_eq!(response.matches.len(), 2);
    assert_eq!(response.matches[0].photo_uid, "c1");
}

#[tokio::test]
async fn test_small_faces_are_rejected() {
    let index = library().await;
    let mut tiny = face("tiny", 0, vec![1.0, 0.0, 0.0], "");
    tiny.bbox = PixelBox::new(10.0, 10.0, 30.0, 30.0);
    index.save_faces("tiny", vec![tiny]).await.unwrap();

    let response = FaceMatcher::new(index)
        .find_matches("Ada", 0.5, 0)
        .await
        .unwrap();
    assert!(response.matches.iter().all(|m| m.photo_uid != "tiny"));
    assert_eq!(response.matches.len(), 3);
}

#[tokio::test]
async fn test_reconciliation_patches_stale_cache() {
    let index = library().await;
    let metadata = Arc::new(MemoryMetadata::new());
    metadata
        .add_photo(Photo {
            uid: "c3".to_string(),
            width: 1000,
            height: 1000,
            orientation: 1,
            ..Default::default()
        })
        .await;
    metadata
        .add_marker(
            "c3",
            Marker {
                uid: "mk-live".to_string(),
                file_uid: "f-c3".to_string(),
                marker_type: "face".to_string(),
                rel_box: RelBox::new(0.1, 0.1, 0.1, 0.1),
                subject_uid: "js-ada".to_string(),
                subject_name: "Ada".to_string(),
                invalid: false,
            },
        )
        .await;
    // c1 lookups fail; the candidate keeps its cached state.
    metadata
        .add_photo(Photo {
            uid: "c1".to_string(),
            ..Default::default()
        })
        .await;
    metadata.fail_markers_for("c1").await;

    let matcher = FaceMatcher::new(index).with_metadata(metadata);
    let response = matcher.find_matches("Ada", 0.5, 0).await.unwrap();

    let c3 = response
        .matches
        .iter()
        .find(|m| m.photo_uid == "c3")
        .unwrap();
    assert_eq!(c3.action, Action::AlreadyDone);
    assert_eq!(c3.marker_uid, "mk-live");
    let c1 = response
        .matches
        .iter()
        .find(|m| m.photo_uid == "c1")
        .unwrap();
    assert_eq!(c1.action, Action::CreateMarker);
    assert_eq!(response.summary.already_done, 1);
}

#[tokio::test]
async fn test_reconciliation_ignores_other_persons_marker() {
    let index = library().await;
    let metadata = Arc::new(MemoryMetadata::new());
    metadata
        .add_photo(Photo {
            uid: "c3".to_string(),
            width: 1000,
            height: 1000,
            orientation: 1,
            ..Default::default()
        })
        .await;
    metadata
        .add_marker(
            "c3",
            Marker {
                uid: "mk-bob".to_string(),
                file_uid: "f-c3".to_string(),
                marker_type: "face".to_string(),
                rel_box: RelBox::new(0.1, 0.1, 0.1, 0.1),
                subject_uid: "js-bob".to_string(),
                subject_name: "Bob".to_string(),
                invalid: false,
            },
        )
        .await;

    let matcher = FaceMatcher::new(index).with_metadata(metadata);
    let response = matcher.find_matches("Ada", 0.5, 0).await.unwrap();

    let c3 = response
        .matches
        .iter()
        .find(|m| m.photo_uid == "c3")
        .unwrap();
    assert_eq!(c3.action, Action::AssignPerson);
    assert_eq!(c3.marker_uid, "mk-bob");
    assert!(c3.subject_name.is_empty());
    assert_eq!(response.summary.already_done, 0);
}

#[tokio::test]
async fn test_outliers_for_person() {
    let index = library().await;
    index
        .save_faces("odd", vec![face("odd", 0, vec![0.0, 1.0, 0.0], "Ada")])
        .await
        .unwrap();

    let response = OutlierDetector::new(index)
        .find_outliers("ada", 0.0, 0)
        .await
        .unwrap();
    assert_eq!(response.total_faces, 4);
    assert_eq!(response.outliers.len(), 3);
    assert_eq!(response.outliers[0].photo_uid, "odd");
    assert_eq!(response.missing_embeddings.len(), 1);
    assert_eq!(response.missing_embeddings[0].photo_uid, "a3");
}

#[tokio::test]
async fn test_apply_create_marker_updates_cache() {
    let index = library().await;
    let metadata = Arc::new(MemoryMetadata::new());
    metadata
        .add_photo(Photo {
            uid: "c1".to_string(),
            file_uid: "f-c1".to_string(),
            ..Default::default()
        })
        .await;

    let applier = FaceActionApplier::new(metadata.clone()).with_faces(index.clone());
    let response = applier
        .apply(ApplyRequest {
            photo_uid: "c1".to_string(),
            person_name: "Ada".to_string(),
            action: Action::CreateMarker,
            marker_uid: None,
            file_uid: None,
            bbox_rel: Some(RelBox::new(0.1, 0.1, 0.1, 0.1)),
            face_index: Some(0),
        })
        .await
        .unwrap();
    assert!(response.success);
    assert!(!response.marker_uid.is_empty());

    let markers = metadata.get_photo_markers("c1").await.unwrap();
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].subject_name, "Ada");
    assert_eq!(markers[0].file_uid, "f-c1");

    let cached = index.get_faces("c1").await.unwrap();
    assert_eq!(cached[0].marker_uid, response.marker_uid);
    assert_eq!(cached[0].subject_name, "Ada");

    // The face now belongs to Ada and is no longer a candidate.
    let again = FaceMatcher::new(index)
        .find_matches("Ada", 0.5, 0)
        .await
        .unwrap();
    assert!(again.matches.iter().all(|m| m.photo_uid != "c1"));
}

#[tokio::test]
async fn test_apply_requires_marker_for_assign() {
    let applier = FaceActionApplier::new(Arc::new(MemoryMetadata::new()));
    let err = applier
        .apply(ApplyRequest {
            photo_uid: "c2".to_string(),
            person_name: "Ada".to_string(),
            action: Action::AssignPerson,
            marker_uid: None,
            file_uid: None,
            bbox_rel: None,
            face_index: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("marker_uid"));
}

#[tokio::test]
async fn test_apply_unassign() {
    let metadata = Arc::new(MemoryMetadata::new());
    metadata
        .add_photo(Photo {
            uid: "p".to_string(),
            ..Default::default()
        })
        .await;
    metadata
        .add_marker(
            "p",
            Marker {
                uid: "mk-p".to_string(),
                marker_type: "face".to_string(),
                subject_uid: "js1".to_string(),
                subject_name: "Ada".to_string(),
                ..Default::default()
            },
        )
        .await;

    let response = FaceActionApplier::new(metadata.clone())
        .apply(ApplyRequest {
            photo_uid: "p".to_string(),
            person_name: String::new(),
            action: Action::UnassignPerson,
            marker_uid: Some("mk-p".to_string()),
            file_uid: None,
            bbox_rel: None,
            face_index: None,
        })
        .await
        .unwrap();
    assert_eq!(response.action, Action::UnassignPerson);
    assert_eq!(response.marker_uid, "mk-p");
    let markers = metadata.get_photo_markers("p").await.unwrap();
    assert!(!markers[0].is_assigned());
}
