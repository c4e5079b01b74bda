//! Near-duplicate photo clustering.
//!
//! Photos within a distance threshold of each other are connected; connected
//! components of two or more photos are reported as duplicate groups.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use photolens_core::{
    defaults, fetch_all_photos, Error, ImageIndex, MetadataService, PhotoQuery, Result,
};

/// Disjoint-set forest with path compression and union by size.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`; returns the resulting root.
    pub fn union(&mut self, a: usize, b: usize) -> usize {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return ra;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        big
    }

    pub fn connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Member photo uids, sorted.
    pub photos: Vec<String>,
    pub photo_count: usize,
    /// Mean of the pairwise distances that formed the group.
    pub avg_distance: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateResponse {
    pub total_photos_scanned: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
    /// Groups found before truncation.
    pub total_groups: usize,
    /// Photos in all groups found before truncation.
    pub total_duplicates: usize,
}

/// Builds duplicate groups from the whole-image index.
pub struct DuplicateClusterer {
    images: Arc<dyn ImageIndex>,
    metadata: Option<Arc<dyn MetadataService>>,
    neighbor_limit: usize,
    concurrency: usize,
}

impl DuplicateClusterer {
    pub fn new(images: Arc<dyn ImageIndex>) -> Self {
        Self {
            images,
            metadata: None,
            neighbor_limit: defaults::DUPLICATE_NEIGHBOR_LIMIT,
            concurrency: defaults::FACE_SEARCH_CONCURRENCY,
        }
    }

    /// Required for album-scoped scans.
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_neighbor_limit(mut self, limit: usize) -> Self {
        self.neighbor_limit = limit.max(1);
        self
    }

    async fn candidates(&self, album_uid: Option<&str>) -> Result<Vec<String>> {
        match album_uid {
            None => self.images.list_photo_uids().await,
            Some(uid) => {
                let metadata = self.metadata.as_ref().ok_or_else(|| {
                    Error::Unavailable("metadata service not configured".to_string())
                })?;
                let photos = fetch_all_photos(metadata.as_ref(), &PhotoQuery::album(uid)).await?;
                Ok(photos.into_iter().map(|p| p.uid).collect())
            }
        }
    }

    /// Scan all indexed photos, or one album's members.
    ///
    /// `threshold <= 0` uses the default; `limit == 0` returns every group.
    #[instrument(skip(self), fields(subsystem = "search", component = "duplicates", op = "find_duplicates"))]
    pub async fn find_duplicates(
        &self,
        album_uid: Option<&str>,
        threshold: f32,
        limit: usize,
    ) -> Result<DuplicateResponse> {
        let start = Instant::now();
        let threshold = if threshold <= 0.0 {
            defaults::DUPLICATE_THRESHOLD
        } else {
            threshold
        };

        let mut uids = self.candidates(album_uid).await?;
        uids.sort();
        uids.dedup();
        let positions: HashMap<&str, usize> = uids
            .iter()
            .enumerate()
            .map(|(i, u)| (u.as_str(), i))
            .collect();

        let neighbor_limit = self.neighbor_limit;
        let mut lookups = stream::iter(uids.clone().into_iter().enumerate())
            .map(|(i, uid)| {
                let images = Arc::clone(&self.images);
                async move {
                    let embedding = match images.get(&uid).await {
                        Ok(Some(e)) => e,
                        Ok(None) => return (i, None),
                        Err(e) => {
                            warn!(photo_uid = %uid, error = %e, "Embedding lookup failed, skipping");
                            return (i, None);
                        }
                    };
                    match images
                        .find_similar_with_distance(&embedding.vector, neighbor_limit, threshold)
                        .await
                    {
                        Ok(hits) => (i, Some(hits)),
                        Err(e) => {
                            warn!(photo_uid = %uid, error = %e, "Neighbour query failed, skipping");
                            (i, None)
                        }
                    }
                }
            })
            .buffer_unordered(self.concurrency.max(1));

        let mut uf = UnionFind::new(uids.len());
        let mut edges: HashMap<(usize, usize), f32> = HashMap::new();
        let mut scanned = 0usize;
        while let Some((i, hits)) = lookups.next().await {
            let Some(hits) = hits else { continue };
            scanned += 1;
            for hit in hits {
                let Some(&j) = positions.get(hit.photo_uid.as_str()) else {
                    continue;
                };
                if i == j {
                    continue;
                }
                uf.union(i, j);
                edges.entry((i.min(j), i.max(j))).or_insert(hit.distance);
            }
        }

        let mut groups = build_groups(&uids, &mut uf, &edges);
        let total_groups = groups.len();
        let total_duplicates = groups.iter().map(|g| g.photo_count).sum();
        if limit > 0 {
            groups.truncate(limit);
        }

        info!(
            result_count = total_groups,
            total_duplicates,
            scanned,
            duration_ms = start.elapsed().as_millis() as u64,
            "Duplicate scan completed"
        );
        Ok(DuplicateResponse {
            total_photos_scanned: scanned,
            duplicate_groups: groups,
            total_groups,
            total_duplicates,
        })
    }
}

/// Group by root, drop singletons, order by size desc then mean distance asc.
fn build_groups(
    uids: &[String],
    uf: &mut UnionFind,
    edges: &HashMap<(usize, usize), f32>,
) -> Vec<DuplicateGroup> {
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..uids.len() {
        members.entry(uf.find(i)).or_default().push(i);
    }

    let mut distances: HashMap<usize, (f64, usize)> = HashMap::new();
    for (&(a, _), &d) in edges {
        let entry = distances.entry(uf.find(a)).or_insert((0.0, 0));
        entry.0 += d as f64;
        entry.1 += 1;
    }

    let mut groups: Vec<DuplicateGroup> = members
        .into_iter()
        .filter(|(_, m)| m.len() >= 2)
        .map(|(root, m)| {
            let avg_distance = distances
                .get(&root)
                .map(|(sum, n)| (*sum / *n as f64) as f32)
                .unwrap_or(0.0);
            let mut photos: Vec<String> = m.iter().map(|&i| uids[i].clone()).collect();
            photos.sort();
            DuplicateGroup {
                photo_count: photos.len(),
                photos,
                avg_distance,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.photo_count
            .cmp(&a.photo_count)
            .then_with(|| {
                a.avg_distance
                    .partial_cmp(&b.avg_distance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.photos.cmp(&b.photos))
    });
    debug!(groups = groups.len(), "Built duplicate groups");
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_find_transitive() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(1, 2);
        assert!(uf.connected(0, 2));
        assert!(!uf.connected(0, 3));
        uf.union(3, 4);
        uf.union(4, 0);
        for i in 0..5 {
            assert_eq!(uf.find(i), uf.find(0));
        }
    }

    #[test]
    fn test_union_returns_root() {
        let mut uf = UnionFind::new(3);
        let r = uf.union(0, 1);
        assert_eq!(uf.find(0), r);
        assert_eq!(uf.union(0, 1), r);
    }

    #[test]
    fn test_build_groups_ordering() {
        let uids: Vec<String> = ["a", "b", "c", "d", "e", "f", "g"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut uf = UnionFind::new(uids.len());
        let mut edges = HashMap::new();
        // pair a-b, tight
        uf.union(0, 1);
        edges.insert((0, 1), 0.01);
        // pair c-d, looser
        uf.union(2, 3);
        edges.insert((2, 3), 0.05);
        // triple e-f-g
        uf.union(4, 5);
        uf.union(5, 6);
        edges.insert((4, 5), 0.04);
        edges.insert((5, 6), 0.06);

        let groups = build_groups(&uids, &mut uf, &edges);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].photos, vec!["e", "f", "g"]);
        assert!((groups[0].avg_distance - 0.05).abs() < 1e-6);
        assert_eq!(groups[1].photos, vec!["a", "b"]);
        assert_eq!(groups[2].photos, vec!["c", "d"]);
    }

    #[test]
    fn test_singletons_dropped() {
        let uids = vec!["x".to_string(), "y".to_string()];
        let mut uf = UnionFind::new(2);
        assert!(build_groups(&uids, &mut uf, &HashMap::new()).is_empty());
    }
}
