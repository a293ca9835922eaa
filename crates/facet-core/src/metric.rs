//! Distance and similarity on the unit sphere.
//!
//! Descriptors are L2-normalized before comparison. The distance between two
//! descriptors is the Euclidean distance of their unit vectors, in [0, 2];
//! similarity is `1 - d² / 4`, which equals `(1 + cos) / 2` and lies in [0, 1].

/// L2-normalize a vector. Zero vectors are returned unchanged.
pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values.to_vec()
    }
}

/// True when every component is zero, so the vector has no direction.
#[inline]
pub fn is_zero(values: &[f32]) -> bool {
    values.iter().all(|&x| x == 0.0)
}

/// Squared Euclidean distance. Always processes every dimension.
#[inline]
pub fn distance_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Map a unit-sphere distance to a similarity in [0, 1].
#[inline]
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance * distance / 4.0).clamp(0.0, 1.0)
}

/// Inverse of [`similarity_from_distance`].
pub fn distance_from_similarity(similarity: f32) -> f32 {
    (4.0 * (1.0 - similarity.clamp(0.0, 1.0))).sqrt()
}
