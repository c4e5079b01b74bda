//! Album and label level similarity.
//!
//! Two strategies over a collection's member vectors:
//! - vote search: one neighbour query per member, merged with a vote floor
//! - suggestions: one query from the L2-normalized member centroid

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use photolens_core::{
    centroid, defaults, fetch_all_albums, fetch_all_labels, fetch_all_photos, l2_normalize,
    CollectionKind, ImageIndex, MetadataService, PhotoQuery, Result,
};

use crate::aggregator::CandidateAggregator;
use crate::config::MatchConfig;

/// A resolved collection with its member photo uids.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub kind: CollectionKind,
    pub id: String,
    pub title: String,
    pub members: Vec<String>,
}

/// Resolve a collection's title and members, paging through all photos.
pub async fn resolve_collection(
    metadata: &dyn MetadataService,
    kind: CollectionKind,
    id: &str,
) -> Result<Collection> {
    let (title, query) = match kind {
        CollectionKind::Album => {
            let album = metadata.get_album(id).await?;
            (album.title, PhotoQuery::album(id))
        }
        CollectionKind::Label => {
            let label = metadata.get_label(id).await?;
            let slug = if label.slug.is_empty() {
                label.uid.clone()
            } else {
                label.slug.clone()
            };
            (label.name, PhotoQuery::label(&slug))
        }
    };
    let members = fetch_all_photos(metadata, &query)
        .await?
        .into_iter()
        .map(|p| p.uid)
        .collect();
    Ok(Collection {
        kind,
        id: id.to_string(),
        title,
        members,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMatch {
    pub photo_uid: String,
    pub distance: f32,
    pub similarity: f32,
    pub match_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSearchResponse {
    pub source_type: CollectionKind,
    pub source_id: String,
    pub source_photo_count: usize,
    pub source_embedding_count: usize,
    pub min_match_count: usize,
    pub threshold: f32,
    pub results: Vec<CollectionMatch>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub photo_uid: String,
    pub distance: f32,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSuggestions {
    pub source_type: CollectionKind,
    pub source_id: String,
    pub title: String,
    pub member_count: usize,
    pub embedding_count: usize,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub collections: Vec<CollectionSuggestions>,
    /// Collections excluded for having too few members or vectors.
    pub skipped: usize,
    pub total_suggestions: usize,
}

/// Outcome of suggesting additions for one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum SuggestOutcome {
    Suggested(CollectionSuggestions),
    Skipped { reason: String },
}

/// Collection-level search over the whole-image index.
pub struct CollectionSearch {
    images: Arc<dyn ImageIndex>,
    metadata: Arc<dyn MetadataService>,
    config: MatchConfig,
    workers: usize,
    min_members: usize,
}

impl CollectionSearch {
    pub fn new(images: Arc<dyn ImageIndex>, metadata: Arc<dyn MetadataService>) -> Self {
        Self {
            images,
            metadata,
            config: MatchConfig::default(),
            workers: defaults::SUGGEST_WORKERS,
            min_members: defaults::COLLECTION_MIN_MEMBERS,
        }
    }

    pub fn with_config(mut self, config: MatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_min_members(mut self, min_members: usize) -> Self {
        self.min_members = min_members.max(1);
        self
    }

    /// Stored vectors of `uids`; missing or failing lookups are skipped.
    async fn member_vectors(&self, uids: &[String]) -> Vec<Vec<f32>> {
        let mut vectors = Vec::with_capacity(uids.len());
        for uid in uids {
            match self.images.get(uid).await {
                Ok(Some(e)) if !e.vector.is_empty() => vectors.push(e.vector),
                Ok(_) => {}
                Err(e) => warn!(photo_uid = %uid, error = %e, "Embedding lookup failed"),
            }
        }
        vectors
    }

    /// Photos similar to many members of a collection.
    ///
    /// `threshold <= 0` uses the default; `limit == 0` means unlimited.
    #[instrument(skip(self), fields(subsystem = "search", component = "collections", op = "vote_search"))]
    pub async fn similar_to_collection(
        &self,
        kind: CollectionKind,
        id: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<CollectionSearchResponse> {
        let start = Instant::now();
        let threshold = if threshold <= 0.0 {
            defaults::COLLECTION_THRESHOLD
        } else {
            threshold
        };
        let collection = resolve_collection(self.metadata.as_ref(), kind, id).await?;
        let members: HashSet<&str> = collection.members.iter().map(String::as_str).collect();
        let vectors = self.member_vectors(&collection.members).await;

        let search_limit = self.config.search_limit(limit);
        let mut queries = stream::iter(vectors.clone())
            .map(|v| {
                let images = Arc::clone(&self.images);
                async move {
                    images
                        .find_similar_with_distance(&v, search_limit, threshold)
                        .await
                }
            })
            .buffer_unordered(self.config.search_concurrency.max(1));

        let mut aggregator = CandidateAggregator::new();
        while let Some(result) = queries.next().await {
            match result {
                Ok(hits) => {
                    for hit in hits {
                        if !members.contains(hit.photo_uid.as_str()) {
                            aggregator.merge(hit.photo_uid, hit.distance, ());
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Neighbour query failed, skipping member"),
            }
        }

        let min_match_count = self.config.min_match_count(vectors.len(), threshold);
        let mut ranked = aggregator.into_ranked(min_match_count);
        if limit > 0 {
            ranked.truncate(limit);
        }
        let results: Vec<CollectionMatch> = ranked
            .into_iter()
            .map(|c| CollectionMatch {
                similarity: 1.0 - c.distance,
                photo_uid: c.target_id,
                distance: c.distance,
                match_count: c.votes,
            })
            .collect();

        info!(
            collection_id = id,
            source_count = vectors.len(),
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Collection vote search completed"
        );
        Ok(CollectionSearchResponse {
            source_type: kind,
            source_id: id.to_string(),
            source_photo_count: collection.members.len(),
            source_embedding_count: vectors.len(),
            min_match_count,
            threshold,
            count: results.len(),
            results,
        })
    }

    /// Non-members near the centroid of one collection.
    ///
    /// `min_similarity <= 0` and `top_k == 0` use defaults.
    pub async fn suggest_for(
        &self,
        kind: CollectionKind,
        id: &str,
        min_similarity: f32,
        top_k: usize,
    ) -> Result<SuggestOutcome> {
        let min_similarity = if min_similarity <= 0.0 {
            defaults::SUGGEST_SIMILARITY
        } else {
            min_similarity.min(1.0)
        };
        let top_k = if top_k == 0 {
            defaults::SUGGEST_TOP_K
        } else {
            top_k
        };

        let collection = resolve_collection(self.metadata.as_ref(), kind, id).await?;
        if collection.members.len() < self.min_members {
            return Ok(SuggestOutcome::Skipped {
                reason: format!("{} members", collection.members.len()),
            });
        }
        let vectors = self.member_vectors(&collection.members).await;
        if vectors.len() < self.min_members {
            return Ok(SuggestOutcome::Skipped {
                reason: format!("{} embeddings", vectors.len()),
            });
        }
        let Some(mut center) = centroid(&vectors) else {
            return Ok(SuggestOutcome::Skipped {
                reason: "no embeddings".to_string(),
            });
        };
        l2_normalize(&mut center);

        let hits = self
            .images
            .find_similar_with_distance(
                &center,
                top_k.saturating_mul(defaults::SUGGEST_OVERFETCH),
                1.0 - min_similarity,
            )
            .await?;

        let members: HashSet<&str> = collection.members.iter().map(String::as_str).collect();
        let suggestions: Vec<Suggestion> = hits
            .into_iter()
            .filter(|h| !members.contains(h.photo_uid.as_str()))
            .take(top_k)
            .map(|h| Suggestion {
                similarity: 1.0 - h.distance,
                photo_uid: h.photo_uid,
                distance: h.distance,
            })
            .collect();

        debug!(
            collection_id = id,
            result_count = suggestions.len(),
            "Collection suggestions computed"
        );
        Ok(SuggestOutcome::Suggested(CollectionSuggestions {
            source_type: kind,
            source_id: collection.id,
            title: collection.title,
            member_count: collection.members.len(),
            embedding_count: vectors.len(),
            suggestions,
        }))
    }

    /// Suggestions for many collections, processed by a bounded worker set.
    ///
    /// With `ids == None` every collection of `kind` is considered.
    /// Collections that are too small or fail to resolve count as skipped.
    #[instrument(skip(self, ids), fields(subsystem = "search", component = "collections", op = "suggest"))]
    pub async fn suggest(
        &self,
        kind: CollectionKind,
        ids: Option<Vec<String>>,
        min_similarity: f32,
        top_k: usize,
    ) -> Result<SuggestionResponse> {
        let start = Instant::now();
        let ids = match ids {
            Some(ids) => ids,
            None => match kind {
                CollectionKind::Album => fetch_all_albums(self.metadata.as_ref())
                    .await?
                    .into_iter()
                    .map(|a| a.uid)
                    .collect(),
                CollectionKind::Label => fetch_all_labels(self.metadata.as_ref())
                    .await?
                    .into_iter()
                    .map(|l| l.uid)
                    .collect(),
            },
        };

        let mut outcomes = stream::iter(ids)
            .map(move |id| async move {
                let outcome = self.suggest_for(kind, &id, min_similarity, top_k).await;
                (id, outcome)
            })
            .buffer_unordered(self.workers);

        let mut response = SuggestionResponse::default();
        while let Some((id, outcome)) = outcomes.next().await {
            match outcome {
                Ok(SuggestOutcome::Suggested(c)) => {
                    response.total_suggestions += c.suggestions.len();
                    response.collections.push(c);
                }
                Ok(SuggestOutcome::Skipped { reason }) => {
                    debug!(collection_id = %id, reason, "Collection skipped");
                    response.skipped += 1;
                }
                Err(e) => {
                    warn!(collection_id = %id, error = %e, "Collection suggestion failed, skipping");
                    response.skipped += 1;
                }
            }
        }

        response.collections.sort_by(|a, b| {
            b.suggestions
                .len()
                .cmp(&a.suggestions.len())
                .then_with(|| a.source_id.cmp(&b.source_id))
        });

        info!(
            result_count = response.collections.len(),
            skipped = response.skipped,
            total_suggestions = response.total_suggestions,
            duration_ms = start.elapsed().as_millis() as u64,
            "Collection suggestions completed"
        );
        Ok(response)
    }
}
