//! Vector math shared by the matching engine.
//!
//! Distances follow the `distance = 1 - cosine_similarity` convention used by
//! the vector index, so values computed here are comparable with index hits.

/// Cosine similarity of two vectors, using f64 intermediate precision.
///
/// Returns 0.0 for dimension mismatches and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot: f64 = 0.0;
    let mut norm_a: f64 = 0.0;
    let mut norm_b: f64 = 0.0;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Cosine distance (`1 - similarity`), in `[0, 2]`.
///
/// Undefined comparisons (dimension mismatch, zero vector) return 2.0, the
/// maximum distance, so they never pass a threshold.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 2.0;
    }
    let has_norm = |v: &[f32]| v.iter().any(|x| *x != 0.0);
    if !has_norm(a) || !has_norm(b) {
        return 2.0;
    }
    1.0 - cosine_similarity(a, b)
}

/// Element-wise mean of a set of vectors.
///
/// The dimension is taken from the first vector. Later vectors that are
/// shorter contribute zero for their missing components; extra components
/// are ignored. Returns `None` for an empty input.
pub fn centroid<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let first = vectors.first()?.as_ref();
    let dim = first.len();
    let mut sum = vec![0.0f64; dim];

    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.as_ref()) {
            *acc += *x as f64;
        }
    }

    let n = vectors.len() as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return;
    }
    for x in v.iter_mut() {
        *x = (*x as f64 / norm) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors_have_zero_distance() {
        let v = [0.3, 0.4, 0.5];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_orthogonal_vectors() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_opposite_vectors() {
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_is_max_distance() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 2.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_zero_vector_is_max_distance() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 2.0);
    }

    #[test]
    fn test_centroid_mean() {
        let c = centroid(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(c, vec![2.0, 3.0]);
    }

    #[test]
    fn test_centroid_short_vector_contributes_zero() {
        let c = centroid(&[vec![2.0, 2.0], vec![4.0]]).unwrap();
        assert_eq!(c, vec![3.0, 1.0]);
    }

    #[test]
    fn test_centroid_empty() {
        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(centroid(&empty).is_none());
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }
}
