//! HTTP [`MetadataService`] client for a PhotoPrism-compatible REST API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use photolens_core::{
    defaults, Album, Error, Label, Marker, MetadataService, NewMarker, Photo, PhotoQuery, RelBox,
    Result,
};

/// API prefix appended to the configured base URL.
const API_PREFIX: &str = "/api/v1";

/// Requests slower than this are logged at WARN.
const SLOW_REQUEST_MS: u64 = 2000;

/// PhotoPrism REST client.
pub struct PhotoPrismClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl PhotoPrismClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(
            subsystem = "db",
            component = "photoprism",
            base_url = %base_url,
            authenticated = token.is_some(),
            "Initializing metadata client"
        );

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Create from `PHOTOPRISM_URL`, `PHOTOPRISM_TOKEN` and
    /// `PHOTOPRISM_TIMEOUT_SECS`. Returns `Ok(None)` when no URL is set.
    pub fn from_env() -> Result<Option<Self>> {
        let base_url = match std::env::var("PHOTOPRISM_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };
        let token = std::env::var("PHOTOPRISM_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());
        let timeout = std::env::var("PHOTOPRISM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::METADATA_TIMEOUT_SECS);

        Self::new(base_url, token, Duration::from_secs(timeout)).map(Some)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::Metadata(format!("{} request failed: {}", what, e)))?;

        let elapsed = start.elapsed().as_millis() as u64;
        if elapsed > SLOW_REQUEST_MS {
            warn!(
                subsystem = "db",
                component = "photoprism",
                op = what,
                duration_ms = elapsed,
                slow = true,
                "Slow metadata request"
            );
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Metadata(format!(
                "{} returned {}: {}",
                what, status, body
            )));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, what: &str, request: RequestBuilder) -> Result<T> {
        self.send(what, request)
            .await?
            .json()
            .await
            .map_err(|e| Error::Metadata(format!("Failed to parse {} response: {}", what, e)))
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct FileDto {
    #[serde(rename = "UID")]
    uid: String,
    hash: String,
    primary: bool,
    width: u32,
    height: u32,
    orientation: u8,
    markers: Vec<MarkerDto>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct PhotoDto {
    #[serde(rename = "UID")]
    uid: String,
    title: String,
    taken_at: Option<DateTime<Utc>>,
    // Flat search results carry the primary file inline.
    #[serde(rename = "FileUID")]
    file_uid: String,
    hash: String,
    width: u32,
    height: u32,
    orientation: u8,
    files: Vec<FileDto>,
}

impl PhotoDto {
    fn primary_file(&self) -> Option<&FileDto> {
        self.files
            .iter()
            .find(|f| f.primary)
            .or_else(|| self.files.first())
    }

    fn into_photo(self) -> Photo {
        let (file_uid, file_hash, width, height, orientation) = match self.primary_file() {
            Some(f) => (f.uid.clone(), f.hash.clone(), f.width, f.height, f.orientation),
            None => (
                self.file_uid.clone(),
                self.hash.clone(),
                self.width,
                self.height,
                self.orientation,
            ),
        };
        Photo {
            uid: self.uid,
            title: self.title,
            taken_at: self.taken_at,
            file_uid,
            file_hash,
            width,
            height,
            orientation,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct MarkerDto {
    #[serde(rename = "UID")]
    uid: String,
    #[serde(rename = "FileUID")]
    file_uid: String,
    #[serde(rename = "Type")]
    marker_type: String,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    #[serde(rename = "SubjUID")]
    subject_uid: String,
    name: String,
    invalid: bool,
}

impl From<MarkerDto> for Marker {
    fn from(m: MarkerDto) -> Self {
        Marker {
            uid: m.uid,
            file_uid: m.file_uid,
            marker_type: m.marker_type,
            rel_box: RelBox::new(m.x, m.y, m.w, m.h),
            subject_uid: m.subject_uid,
            subject_name: m.name,
            invalid: m.invalid,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct AlbumDto {
    #[serde(rename = "UID")]
    uid: String,
    title: String,
    #[serde(rename = "Type")]
    album_type: String,
    photo_count: u32,
}

impl From<AlbumDto> for Album {
    fn from(a: AlbumDto) -> Self {
        Album {
            uid: a.uid,
            title: a.title,
            album_type: a.album_type,
            photo_count: a.photo_count,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LabelDto {
    #[serde(rename = "UID")]
    uid: String,
    name: String,
    slug: String,
    photo_count: u32,
}

impl From<LabelDto> for Label {
    fn from(l: LabelDto) -> Self {
        Label {
            uid: l.uid,
            name: l.name,
            slug: l.slug,
            photo_count: l.photo_count,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CreateMarkerBody<'a> {
    #[serde(rename = "FileUID")]
    file_uid: &'a str,
    #[serde(rename = "Type")]
    marker_type: &'a str,
    src: &'a str,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    name: &'a str,
    review: bool,
}

// =============================================================================
// SERVICE IMPLEMENTATION
// =============================================================================

#[async_trait]
impl MetadataService for PhotoPrismClient {
    #[instrument(skip(self), fields(subsystem = "db", component = "photoprism", op = "get_photo"))]
    async fn get_photo(&self, uid: &str) -> Result<Photo> {
        let dto: PhotoDto = self
            .send_json(
                &format!("photo {}", uid),
                self.client.get(self.url(&format!("/photos/{}", uid))),
            )
            .await?;
        Ok(dto.into_photo())
    }

    #[instrument(skip(self, query), fields(subsystem = "db", component = "photoprism", op = "list_photos", count = query.count, offset = query.offset))]
    async fn list_photos(&self, query: &PhotoQuery) -> Result<Vec<Photo>> {
        let count = if query.count == 0 {
            defaults::PHOTO_PAGE_SIZE
        } else {
            query.count
        };
        let mut params: Vec<(&str, String)> = vec![
            ("count", count.to_string()),
            ("offset", query.offset.to_string()),
            ("merged", "true".to_string()),
            ("order", "added".to_string()),
        ];
        if let Some(q) = &query.query {
            params.push(("q", q.clone()));
        }
        if let Some(album) = &query.album_uid {
            params.push(("s", album.clone()));
        }

        let dtos: Vec<PhotoDto> = self
            .send_json("photo search", self.client.get(self.url("/photos")).query(&params))
            .await?;
        debug!(result_count = dtos.len(), "Photo page fetched");
        Ok(dtos.into_iter().map(PhotoDto::into_photo).collect())
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "photoprism", op = "get_photo_markers"))]
    async fn get_photo_markers(&self, photo_uid: &str) -> Result<Vec<Marker>> {
        let dto: PhotoDto = self
            .send_json(
                &format!("photo {}", photo_uid),
                self.client.get(self.url(&format!("/photos/{}", photo_uid))),
            )
            .await?;

        let mut markers = Vec::new();
        for file in dto.files {
            for m in file.markers {
                let mut marker = Marker::from(m);
                if marker.file_uid.is_empty() {
                    marker.file_uid = file.uid.clone();
                }
                markers.push(marker);
            }
        }
        Ok(markers)
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "photoprism", op = "download"))]
    async fn download_file(&self, file_hash: &str) -> Result<Vec<u8>> {
        let response = self
            .send(
                &format!("file {}", file_hash),
                self.client.get(self.url(&format!("/dl/{}", file_hash))),
            )
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Metadata(format!("Failed to read file {}: {}", file_hash, e)))?;
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self, marker), fields(subsystem = "db", component = "photoprism", op = "create_marker", photo_uid = %marker.photo_uid))]
    async fn create_marker(&self, marker: NewMarker) -> Result<Marker> {
        let body = CreateMarkerBody {
            file_uid: &marker.file_uid,
            marker_type: "face",
            src: "manual",
            x: marker.rel_box.x,
            y: marker.rel_box.y,
            w: marker.rel_box.w,
            h: marker.rel_box.h,
            name: marker.subject_name.as_deref().unwrap_or(""),
            review: false,
        };
        let dto: MarkerDto = self
            .send_json(
                "create marker",
                self.client.post(self.url("/markers")).json(&body),
            )
            .await?;
        Ok(dto.into())
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "photoprism", op = "assign_subject"))]
    async fn assign_marker_subject(&self, marker_uid: &str, subject_name: &str) -> Result<Marker> {
        let dto: MarkerDto = self
            .send_json(
                &format!("marker {}", marker_uid),
                self.client
                    .put(self.url(&format!("/markers/{}", marker_uid)))
                    .json(&json!({ "Name": subject_name, "SubjSrc": "manual" })),
            )
            .await?;
        Ok(dto.into())
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "photoprism", op = "unassign_subject"))]
    async fn unassign_marker_subject(&self, marker_uid: &str) -> Result<Marker> {
        let dto: MarkerDto = self
            .send_json(
                &format!("marker {}", marker_uid),
                self.client
                    .delete(self.url(&format!("/markers/{}/subject", marker_uid))),
            )
            .await?;
        Ok(dto.into())
    }

    async fn get_album(&self, uid: &str) -> Result<Album> {
        let dto: AlbumDto = self
            .send_json(
                &format!("album {}", uid),
                self.client.get(self.url(&format!("/albums/{}", uid))),
            )
            .await?;
        Ok(dto.into())
    }

    async fn list_albums(&self, count: usize, offset: usize) -> Result<Vec<Album>> {
        let dtos: Vec<AlbumDto> = self
            .send_json(
                "album list",
                self.client.get(self.url("/albums")).query(&[
                    ("count", count.to_string()),
                    ("offset", offset.to_string()),
                    ("type", "album".to_string()),
                ]),
            )
            .await?;
        Ok(dtos.into_iter().map(Album::from).collect())
    }

    async fn get_label(&self, uid: &str) -> Result<Label> {
        let dto: LabelDto = self
            .send_json(
                &format!("label {}", uid),
                self.client.get(self.url(&format!("/labels/{}", uid))),
            )
            .await?;
        Ok(dto.into())
    }

    async fn list_labels(&self, count: usize, offset: usize) -> Result<Vec<Label>> {
        let dtos: Vec<LabelDto> = self
            .send_json(
                "label list",
                self.client.get(self.url("/labels")).query(&[
                    ("count", count.to_string()),
                    ("offset", offset.to_string()),
                    ("all", "true".to_string()),
                ]),
            )
            .await?;
        Ok(dtos.into_iter().map(Label::from).collect())
    }

    #[instrument(skip(self), fields(subsystem = "db", component = "photoprism", op = "add_label"))]
    async fn add_photo_label(&self, photo_uid: &str, label_name: &str, uncertainty: u8) -> Result<()> {
        self.send(
            &format!("photo {}", photo_uid),
            self.client
                .post(self.url(&format!("/photos/{}/label", photo_uid)))
                .json(&json!({
                    "Name": label_name,
                    "Uncertainty": uncertainty.min(100),
                    "Priority": 10,
                })),
        )
        .await?;
        Ok(())
    }
}
