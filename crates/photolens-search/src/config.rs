//! Matching engine tunables.

use photolens_core::defaults;

/// Tunables shared by face matching and collection vote search.
///
/// The vote-floor constants are empirical. They are kept configurable, with
/// defaults that reproduce the established behaviour exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    /// Upper clamp of the vote-threshold factor (default: 0.05)
    pub vote_factor_max: f32,
    /// Lower clamp of the vote-threshold factor (default: 0.01)
    pub vote_factor_min: f32,
    /// Smallest vote floor (default: 1)
    pub vote_floor_min: usize,
    /// Largest vote floor (default: 5)
    pub vote_floor_max: usize,
    /// Cap on per-source neighbour queries (default: 1000)
    pub search_limit_max: usize,
    /// Faces narrower than this many pixels are rejected (default: 35)
    pub face_min_width_px: f64,
    /// Faces narrower than this fraction of the image width are rejected (default: 0.01)
    pub face_min_width_rel: f64,
    /// Minimum IoU to associate a face with a marker (default: 0.1)
    pub face_marker_iou: f64,
    /// Concurrent neighbour queries per request (default: 8)
    pub search_concurrency: usize,
    /// Concurrent marker lookups in the reconciliation pass (default: 8)
    pub reconcile_concurrency: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            vote_factor_max: defaults::VOTE_FACTOR_MAX,
            vote_factor_min: defaults::VOTE_FACTOR_MIN,
            vote_floor_min: defaults::VOTE_FLOOR_MIN,
            vote_floor_max: defaults::VOTE_FLOOR_MAX,
            search_limit_max: defaults::SEARCH_LIMIT_MAX,
            face_min_width_px: defaults::FACE_MIN_WIDTH_PX,
            face_min_width_rel: defaults::FACE_MIN_WIDTH_REL,
            face_marker_iou: defaults::FACE_MARKER_IOU,
            search_concurrency: defaults::FACE_SEARCH_CONCURRENCY,
            reconcile_concurrency: defaults::RECONCILE_CONCURRENCY,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl MatchConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// Reads `VOTE_FACTOR_MAX`, `VOTE_FACTOR_MIN`, `VOTE_FLOOR_MIN`,
    /// `VOTE_FLOOR_MAX`, `SEARCH_LIMIT_MAX`, `FACE_MIN_WIDTH_PX`,
    /// `FACE_MIN_WIDTH_REL` and `FACE_MARKER_IOU`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let mut config = Self {
            vote_factor_max: env_parse("VOTE_FACTOR_MAX").unwrap_or(d.vote_factor_max),
            vote_factor_min: env_parse("VOTE_FACTOR_MIN").unwrap_or(d.vote_factor_min),
            vote_floor_min: env_parse("VOTE_FLOOR_MIN").unwrap_or(d.vote_floor_min),
            vote_floor_max: env_parse("VOTE_FLOOR_MAX").unwrap_or(d.vote_floor_max),
            search_limit_max: env_parse::<usize>("SEARCH_LIMIT_MAX")
                .filter(|n| *n > 0)
                .unwrap_or(d.search_limit_max),
            face_min_width_px: env_parse("FACE_MIN_WIDTH_PX").unwrap_or(d.face_min_width_px),
            face_min_width_rel: env_parse("FACE_MIN_WIDTH_REL").unwrap_or(d.face_min_width_rel),
            face_marker_iou: env_parse("FACE_MARKER_IOU").unwrap_or(d.face_marker_iou),
            ..d
        };
        config.normalize();
        config
    }

    /// Repair inverted clamp bounds so `clamp` never panics.
    fn normalize(&mut self) {
        if self.vote_factor_min > self.vote_factor_max {
            std::mem::swap(&mut self.vote_factor_min, &mut self.vote_factor_max);
        }
        if self.vote_floor_min > self.vote_floor_max {
            std::mem::swap(&mut self.vote_floor_min, &mut self.vote_floor_max);
        }
        self.vote_floor_min = self.vote_floor_min.max(1);
        self.vote_floor_max = self.vote_floor_max.max(self.vote_floor_min);
    }

    pub fn with_vote_factors(mut self, min: f32, max: f32) -> Self {
        self.vote_factor_min = min;
        self.vote_factor_max = max;
        self.normalize();
        self
    }

    pub fn with_vote_floor(mut self, min: usize, max: usize) -> Self {
        self.vote_floor_min = min;
        self.vote_floor_max = max;
        self.normalize();
        self
    }

    pub fn with_face_min_width(mut self, px: f64, rel: f64) -> Self {
        self.face_min_width_px = px;
        self.face_min_width_rel = rel;
        self
    }

    pub fn with_search_limit_max(mut self, max: usize) -> Self {
        self.search_limit_max = max.max(1);
        self
    }

    /// Per-source neighbour limit: `limit * 10` capped at `search_limit_max`;
    /// `limit == 0` (unlimited) uses the cap.
    pub fn search_limit(&self, limit: usize) -> usize {
        if limit == 0 {
            return self.search_limit_max;
        }
        limit
            .saturating_mul(defaults::SEARCH_LIMIT_MULTIPLIER)
            .min(self.search_limit_max)
    }

    /// Minimum number of votes a candidate needs.
    ///
    /// `clamp(round(sources * factor), floor_min, floor_max)` with
    /// `factor = clamp(threshold / 0.5 * 0.05, 0.01, 0.05)`. A threshold
    /// `<= 0` is treated as the default match threshold.
    pub fn min_match_count(&self, source_count: usize, threshold: f32) -> usize {
        let threshold = if threshold <= 0.0 || !threshold.is_finite() {
            defaults::MATCH_THRESHOLD
        } else {
            threshold
        };
        let factor = (threshold / defaults::MATCH_THRESHOLD * self.vote_factor_max)
            .clamp(self.vote_factor_min, self.vote_factor_max);
        let raw = (source_count as f64 * factor as f64).round() as usize;
        raw.clamp(self.vote_floor_min, self.vote_floor_max)
    }

    /// True when a detected face is too small to trust.
    pub fn face_too_small(&self, face_width_px: f64, photo_width: u32) -> bool {
        if face_width_px < self.face_min_width_px {
            return true;
        }
        photo_width > 0 && face_width_px / (photo_width as f64) < self.face_min_width_rel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_limit() {
        let c = MatchConfig::default();
        assert_eq!(c.search_limit(0), 1000);
        assert_eq!(c.search_limit(5), 50);
        assert_eq!(c.search_limit(500), 1000);
    }

    #[test]
    fn test_min_match_count_bounds() {
        let c = MatchConfig::default();
        for sources in [0usize, 1, 3, 10, 50, 100, 1000, 100_000] {
            for threshold in [-1.0f32, 0.0, 0.001, 0.1, 0.25, 0.5, 0.9, 2.0, 100.0] {
                let n = c.min_match_count(sources, threshold);
                assert!((1..=5).contains(&n), "sources={} threshold={} -> {}", sources, threshold, n);
            }
        }
    }

    #[test]
    fn test_min_match_count_values() {
        let c = MatchConfig::default();
        // factor 0.05: 40 sources -> 2 votes
        assert_eq!(c.min_match_count(40, 0.5), 2);
        // threshold <= 0 behaves like 0.5
        assert_eq!(c.min_match_count(40, 0.0), 2);
        // loose threshold saturates the factor at 0.05, many sources saturate at 5
        assert_eq!(c.min_match_count(1000, 5.0), 5);
        // tiny threshold clamps factor to 0.01: 100 sources -> 1 vote
        assert_eq!(c.min_match_count(100, 0.0001), 1);
        // factor 0.03 at threshold 0.3: 100 sources -> 3 votes
        assert_eq!(c.min_match_count(100, 0.3), 3);
    }

    #[test]
    fn test_configurable_vote_floor() {
        let c = MatchConfig::default().with_vote_floor(2, 3);
        assert_eq!(c.min_match_count(1, 0.5), 2);
        assert_eq!(c.min_match_count(10_000, 0.5), 3);
    }

    #[test]
    fn test_inverted_bounds_are_repaired() {
        let c = MatchConfig::default().with_vote_floor(6, 2);
        assert_eq!(c.vote_floor_min, 2);
        assert_eq!(c.vote_floor_max, 6);
        let c = MatchConfig::default().with_vote_factors(0.1, 0.02);
        assert!(c.vote_factor_min <= c.vote_factor_max);
    }

    #[test]
    fn test_face_too_small() {
        let c = MatchConfig::default();
        assert!(c.face_too_small(20.0, 1000));
        // 40px on a 5000px image is below 1%
        assert!(c.face_too_small(40.0, 5000));
        assert!(!c.face_too_small(80.0, 4000));
        assert!(!c.face_too_small(40.0, 0));
    }
}
