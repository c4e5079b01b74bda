//! In-memory [`MetadataService`] used by tests and offline demos.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use photolens_core::{
    Album, Error, Label, Marker, MetadataService, NewMarker, Photo, PhotoQuery, Result,
};

#[derive(Default)]
struct State {
    photos: BTreeMap<String, Photo>,
    markers: HashMap<String, Vec<Marker>>,
    files: HashMap<String, Vec<u8>>,
    albums: BTreeMap<String, (Album, BTreeSet<String>)>,
    labels: BTreeMap<String, (Label, BTreeSet<String>)>,
    subjects: HashMap<String, String>,
    /// Photos whose marker lookups fail, for exercising fallbacks.
    failing_markers: HashSet<String>,
}

/// Metadata store held entirely in memory.
///
/// Photo listings are ordered by uid. A `label:<slug>` query selects label
/// members; any other query matches photo titles case-insensitively.
#[derive(Default)]
pub struct MemoryMetadata {
    state: RwLock<State>,
    next_id: AtomicU64,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_uid(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{:06}", prefix, n)
    }

    pub async fn add_photo(&self, photo: Photo) {
        self.state
            .write()
            .await
            .photos
            .insert(photo.uid.clone(), photo);
    }

    /// Register file bytes served by `download_file`.
    pub async fn add_file(&self, file_hash: &str, bytes: Vec<u8>) {
        self.state
            .write()
            .await
            .files
            .insert(file_hash.to_string(), bytes);
    }

    pub async fn add_marker(&self, photo_uid: &str, marker: Marker) {
        let mut state = self.state.write().await;
        if !marker.subject_name.is_empty() && !marker.subject_uid.is_empty() {
            state
                .subjects
                .insert(marker.subject_name.to_lowercase(), marker.subject_uid.clone());
        }
        state
            .markers
            .entry(photo_uid.to_string())
            .or_default()
            .push(marker);
    }

    pub async fn add_album(&self, album: Album, members: &[&str]) {
        let members = members.iter().map(|s| s.to_string()).collect();
        self.state
            .write()
            .await
            .albums
            .insert(album.uid.clone(), (album, members));
    }

    pub async fn add_label(&self, label: Label, members: &[&str]) {
        let members = members.iter().map(|s| s.to_string()).collect();
        self.state
            .write()
            .await
            .labels
            .insert(label.uid.clone(), (label, members));
    }

    /// Make `get_photo_markers` fail for one photo.
    pub async fn fail_markers_for(&self, photo_uid: &str) {
        self.state
            .write()
            .await
            .failing_markers
            .insert(photo_uid.to_string());
    }

    /// Names of labels currently attached to a photo.
    pub async fn photo_labels(&self, photo_uid: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .labels
            .values()
            .filter(|(_, members)| members.contains(photo_uid))
            .map(|(label, _)| label.name.clone())
            .collect()
    }

    fn subject_uid(&self, state: &mut State, name: &str) -> String {
        let key = name.to_lowercase();
        if let Some(uid) = state.subjects.get(&key) {
            return uid.clone();
        }
        let uid = self.generate_uid("js");
        state.subjects.insert(key, uid.clone());
        uid
    }
}

fn page<T: Clone>(items: Vec<T>, count: usize, offset: usize) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    if count == 0 {
        iter.collect()
    } else {
        iter.take(count).collect()
    }
}

fn find_marker<'a>(state: &'a mut State, marker_uid: &str) -> Result<&'a mut Marker> {
    state
        .markers
        .values_mut()
        .flatten()
        .find(|m| m.uid == marker_uid)
        .ok_or_else(|| Error::NotFound(format!("marker {}", marker_uid)))
}

#[async_trait]
impl MetadataService for MemoryMetadata {
    async fn get_photo(&self, uid: &str) -> Result<Photo> {
        self.state
            .read()
            .await
            .photos
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("photo {}", uid)))
    }

    async fn list_photos(&self, query: &PhotoQuery) -> Result<Vec<Photo>> {
        let state = self.state.read().await;

        let album_members = match &query.album_uid {
            Some(uid) => Some(
                &state
                    .albums
                    .get(uid)
                    .ok_or_else(|| Error::NotFound(format!("album {}", uid)))?
                    .1,
            ),
            None => None,
        };

        let q = query.query.as_deref().map(str::trim).unwrap_or("");
        let label_members = match q.strip_prefix("label:") {
            Some(slug) => Some(
                state
                    .labels
                    .values()
                    .find(|(label, _)| label.slug == slug || label.uid == slug)
                    .map(|(_, members)| members.clone())
                    .unwrap_or_default(),
            ),
            None => None,
        };
        let title_filter = (label_members.is_none() && !q.is_empty()).then(|| q.to_lowercase());

        let photos: Vec<Photo> = state
            .photos
            .values()
            .filter(|p| album_members.map_or(true, |m| m.contains(&p.uid)))
            .filter(|p| label_members.as_ref().map_or(true, |m| m.contains(&p.uid)))
            .filter(|p| {
                title_filter
                    .as_ref()
                    .map_or(true, |t| p.title.to_lowercase().contains(t))
            })
            .cloned()
            .collect();

        Ok(page(photos, query.count, query.offset))
    }

    async fn get_photo_markers(&self, photo_uid: &str) -> Result<Vec<Marker>> {
        let state = self.state.read().await;
        if state.failing_markers.contains(photo_uid) {
            return Err(Error::Metadata(format!(
                "marker lookup failed for {}",
                photo_uid
            )));
        }
        if !state.photos.contains_key(photo_uid) {
            return Err(Error::NotFound(format!("photo {}", photo_uid)));
        }
        Ok(state.markers.get(photo_uid).cloned().unwrap_or_default())
    }

    async fn download_file(&self, file_hash: &str) -> Result<Vec<u8>> {
        self.state
            .read()
            .await
            .files
            .get(file_hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("file {}", file_hash)))
    }

    async fn create_marker(&self, marker: NewMarker) -> Result<Marker> {
        let mut state = self.state.write().await;
        if !state.photos.contains_key(&marker.photo_uid) {
            return Err(Error::NotFound(format!("photo {}", marker.photo_uid)));
        }

        let subject_name = marker.subject_name.clone().unwrap_or_default();
        let subject_uid = if subject_name.is_empty() {
            String::new()
        } else {
            self.subject_uid(&mut state, &subject_name)
        };
        let created = Marker {
            uid: self.generate_uid("mk"),
            file_uid: marker.file_uid,
            marker_type: "face".to_string(),
            rel_box: marker.rel_box,
            subject_uid,
            subject_name,
            invalid: false,
        };
        state
            .markers
            .entry(marker.photo_uid)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    async fn assign_marker_subject(&self, marker_uid: &str, subject_name: &str) -> Result<Marker> {
        let mut state = self.state.write().await;
        let subject_uid = self.subject_uid(&mut state, subject_name);
        let marker = find_marker(&mut state, marker_uid)?;
        marker.subject_uid = subject_uid;
        marker.subject_name = subject_name.to_string();
        Ok(marker.clone())
    }

    async fn unassign_marker_subject(&self, marker_uid: &str) -> Result<Marker> {
        let mut state = self.state.write().await;
        let marker = find_marker(&mut state, marker_uid)?;
        marker.subject_uid.clear();
        marker.subject_name.clear();
        Ok(marker.clone())
    }

    async fn get_album(&self, uid: &str) -> Result<Album> {
        let state = self.state.read().await;
        let (album, members) = state
            .albums
            .get(uid)
            .ok_or_else(|| Error::NotFound(format!("album {}", uid)))?;
        Ok(Album {
            photo_count: members.len() as u32,
            ..album.clone()
        })
    }

    async fn list_albums(&self, count: usize, offset: usize) -> Result<Vec<Album>> {
        let state = self.state.read().await;
        let albums = state
            .albums
            .values()
            .map(|(album, members)| Album {
                photo_count: members.len() as u32,
                ..album.clone()
            })
            .collect();
        Ok(page(albums, count, offset))
    }

    async fn get_label(&self, uid: &str) -> Result<Label> {
        let state = self.state.read().await;
        let (label, members) = state
            .labels
            .get(uid)
            .ok_or_else(|| Error::NotFound(format!("label {}", uid)))?;
        Ok(Label {
            photo_count: members.len() as u32,
            ..label.clone()
        })
    }

    async fn list_labels(&self, count: usize, offset: usize) -> Result<Vec<Label>> {
        let state = self.state.read().await;
        let labels = state
            .labels
            .values()
            .map(|(label, members)| Label {
                photo_count: members.len() as u32,
                ..label.clone()
            })
            .collect();
        Ok(page(labels, count, offset))
    }

    async fn add_photo_label(&self, photo_uid: &str, label_name: &str, _uncertainty: u8) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.photos.contains_key(photo_uid) {
            return Err(Error::NotFound(format!("photo {}", photo_uid)));
        }

        let existing = state
            .labels
            .values_mut()
            .find(|(label, _)| label.name.eq_ignore_ascii_case(label_name));
        match existing {
            Some((_, members)) => {
                members.insert(photo_uid.to_string());
            }
            None => {
                let uid = self.generate_uid("lb");
                let label = Label {
                    uid: uid.clone(),
                    name: label_name.to_string(),
                    slug: label_name.to_lowercase().replace(' ', "-"),
                    photo_count: 0,
                };
                let members = BTreeSet::from([photo_uid.to_string()]);
                state.labels.insert(uid, (label, members));
            }
        }
        Ok(())
    }
}
