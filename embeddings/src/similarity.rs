//! Similarity computation for embeddings.
//!
//! Vectors are stored as `f32`; every accumulation here happens in `f64` so
//! rounding error stays bounded for wide embeddings.

use crate::error::{EmbeddingError, Result};

/// Euclidean (L2) norm of a vector.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt()
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum())
}

/// Compute the cosine similarity between two embeddings.
///
/// Returns a value between -1.0 and 1.0, where:
/// - 1.0 means identical direction
/// - 0.0 means orthogonal vectors (or either vector has zero norm)
/// - -1.0 means opposite vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    let dot_product = dot(a, b)?;
    let magnitude_a = l2_norm(a);
    let magnitude_b = l2_norm(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot_product / (magnitude_a * magnitude_b))
}

/// Normalize an embedding to unit length in place.
///
/// Zero vectors are left as all zeros. Returns `false` in that case.
pub fn normalize(embedding: &mut [f32]) -> bool {
    let magnitude = l2_norm(embedding);
    if magnitude == 0.0 {
        return false;
    }

    for x in embedding.iter_mut() {
        *x = (f64::from(*x) / magnitude) as f32;
    }
    true
}

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cosine_of_axis_vectors() {
        let x = [1.0, 0.0, 0.0];
        for (other, expected) in [
            ([2.0, 0.0, 0.0], 1.0),
            ([0.0, 5.0, 0.0], 0.0),
            ([-0.5, 0.0, 0.0], -1.0),
        ] {
            let sim = cosine_similarity(&x, &other).unwrap();
            assert!((sim - expected).abs() < 1e-9, "{other:?}: {sim}");
        }
    }

    #[test]
    fn test_dot_accumulates_in_f64() {
        let a = vec![1e-4_f32; 10_000];
        let sum = dot(&a, &a).unwrap();
        assert!((sum - 1e-4).abs() < 1e-9, "{sum}");
    }

    #[test]
    fn test_cosine_similarity_ignores_magnitude() {
        let a = vec![3.0, 4.0];
        let b = vec![0.6, 0.8];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_similarity_is_zero() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap();
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).is_err());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        assert!(normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_stays_zero() {
        let mut v = vec![0.0, 0.0, 0.0];
        assert!(!normalize(&mut v));
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123_456, 4), 0.1235);
        assert_eq!(round_to(0.9999, 3), 1.0);
    }
}
