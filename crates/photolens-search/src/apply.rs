//! Execute a face action against the metadata service.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use photolens_core::{
    Action, Error, FaceIndex, FaceMarkerUpdate, Marker, MetadataService, NewMarker, RelBox, Result,
};

/// One face action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub photo_uid: String,
    pub person_name: String,
    pub action: Action,
    #[serde(default)]
    pub marker_uid: Option<String>,
    #[serde(default)]
    pub file_uid: Option<String>,
    #[serde(default)]
    pub bbox_rel: Option<RelBox>,
    #[serde(default)]
    pub face_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub success: bool,
    pub action: Action,
    pub marker_uid: String,
}

/// Applies match decisions and refreshes the face cache.
pub struct FaceActionApplier {
    metadata: Arc<dyn MetadataService>,
    faces: Option<Arc<dyn FaceIndex>>,
}

fn required<'a>(value: &'a Option<String>, field: &str, action: Action) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("{} is required for {}", field, action)))
}

impl FaceActionApplier {
    pub fn new(metadata: Arc<dyn MetadataService>) -> Self {
        Self {
            metadata,
            faces: None,
        }
    }

    /// Cached face records are updated after each mutation when set.
    pub fn with_faces(mut self, faces: Arc<dyn FaceIndex>) -> Self {
        self.faces = Some(faces);
        self
    }

    #[instrument(skip(self, request), fields(subsystem = "search", component = "face_apply", op = "apply", photo_uid = %request.photo_uid, action = %request.action))]
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyResponse> {
        if request.photo_uid.trim().is_empty() {
            return Err(Error::InvalidInput("photo_uid is required".to_string()));
        }
        let person = request.person_name.trim();
        if person.is_empty() && request.action != Action::UnassignPerson {
            return Err(Error::InvalidInput("person_name is required".to_string()));
        }

        let marker: Option<Marker> = match request.action {
            Action::CreateMarker => {
                let rel_box = request.bbox_rel.ok_or_else(|| {
                    Error::InvalidInput("bbox_rel is required for create_marker".to_string())
                })?;
                let file_uid = match request.file_uid.as_deref().filter(|f| !f.is_empty()) {
                    Some(f) => f.to_string(),
                    None => self.metadata.get_photo(&request.photo_uid).await?.file_uid,
                };
                Some(
                    self.metadata
                        .create_marker(NewMarker {
                            photo_uid: request.photo_uid.clone(),
                            file_uid,
                            rel_box,
                            subject_name: Some(person.to_string()),
                        })
                        .await?,
                )
            }
            Action::AssignPerson => {
                let uid = required(&request.marker_uid, "marker_uid", request.action)?;
                Some(self.metadata.assign_marker_subject(uid, person).await?)
            }
            Action::UnassignPerson => {
                let uid = required(&request.marker_uid, "marker_uid", request.action)?;
                Some(self.metadata.unassign_marker_subject(uid).await?)
            }
            Action::AlreadyDone => None,
        };

        let marker_uid = marker
            .as_ref()
            .map(|m| m.uid.clone())
            .or_else(|| request.marker_uid.clone())
            .unwrap_or_default();

        if let (Some(marker), Some(faces), Some(face_index)) =
            (marker.as_ref(), self.faces.as_ref(), request.face_index)
        {
            // Cache refresh is best effort; the mutation already happened.
            if let Err(e) = faces
                .update_face_marker(
                    &request.photo_uid,
                    face_index,
                    FaceMarkerUpdate::from_marker(marker),
                )
                .await
            {
                warn!(error = %e, face_index, "Failed to refresh cached face marker");
            }
        }

        info!(marker_uid = %marker_uid, "Face action applied");
        Ok(ApplyResponse {
            success: true,
            action: request.action,
            marker_uid,
        })
    }
}
