//! Vote-counting merge of nearest-neighbour result sets.

use std::collections::HashMap;

/// One aggregated candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate<P> {
    pub target_id: String,
    /// Lowest distance seen for this target.
    pub distance: f32,
    /// Number of merged hits that produced this target.
    pub votes: usize,
    /// Payload attached to the hit that produced `distance`.
    pub payload: P,
}

/// Merges neighbour hits keyed by target id.
///
/// Every hit counts as a vote, but only a strictly lower distance replaces
/// the stored best distance and payload.
#[derive(Debug, Clone)]
pub struct CandidateAggregator<P> {
    candidates: HashMap<String, MatchCandidate<P>>,
}

impl<P> Default for CandidateAggregator<P> {
    fn default() -> Self {
        Self {
            candidates: HashMap::new(),
        }
    }
}

impl<P> CandidateAggregator<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, target_id: impl Into<String>, distance: f32, payload: P) {
        let target_id = target_id.into();
        match self.candidates.get_mut(&target_id) {
            Some(existing) => {
                existing.votes += 1;
                if distance < existing.distance {
                    existing.distance = distance;
                    existing.payload = payload;
                }
            }
            None => {
                self.candidates.insert(
                    target_id.clone(),
                    MatchCandidate {
                        target_id,
                        distance,
                        votes: 1,
                        payload,
                    },
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, target_id: &str) -> Option<&MatchCandidate<P>> {
        self.candidates.get(target_id)
    }

    pub fn get_mut(&mut self, target_id: &str) -> Option<&mut MatchCandidate<P>> {
        self.candidates.get_mut(target_id)
    }

    /// Candidates with at least `min_votes` votes, ascending by distance.
    ///
    /// Ties are broken by target id so the order is deterministic.
    pub fn into_ranked(self, min_votes: usize) -> Vec<MatchCandidate<P>> {
        let mut out: Vec<MatchCandidate<P>> = self
            .candidates
            .into_values()
            .filter(|c| c.votes >= min_votes)
            .collect();
        out.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        out
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut MatchCandidate<P>> {
        self.candidates.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_has_one_vote() {
        let mut agg = CandidateAggregator::new();
        agg.merge("a", 0.4, "first");
        let c = agg.get("a").unwrap();
        assert_eq!(c.votes, 1);
        assert_eq!(c.distance, 0.4);
        assert_eq!(c.payload, "first");
    }

    #[test]
    fn test_better_distance_replaces_payload() {
        let mut agg = CandidateAggregator::new();
        agg.merge("a", 0.4, "far");
        agg.merge("a", 0.2, "near");
        let c = agg.get("a").unwrap();
        assert_eq!(c.votes, 2);
        assert_eq!(c.distance, 0.2);
        assert_eq!(c.payload, "near");
    }

    #[test]
    fn test_worse_or_equal_distance_only_votes() {
        let mut agg = CandidateAggregator::new();
        agg.merge("a", 0.2, "best");
        agg.merge("a", 0.3, "worse");
        agg.merge("a", 0.2, "tie");
        let c = agg.get("a").unwrap();
        assert_eq!(c.votes, 3);
        assert_eq!(c.payload, "best");
    }

    #[test]
    fn test_ranked_filters_by_votes_and_sorts() {
        let mut agg = CandidateAggregator::new();
        agg.merge("single", 0.01, ());
        agg.merge("b", 0.3, ());
        agg.merge("b", 0.35, ());
        agg.merge("a", 0.1, ());
        agg.merge("a", 0.2, ());
        let ranked = agg.into_ranked(2);
        let ids: Vec<&str> = ranked.iter().map(|c| c.target_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
