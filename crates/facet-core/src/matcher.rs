//! Descriptor matching: pairwise, against a batch, and against batch subsets.

use crate::batch::DescriptorBatch;
use crate::descriptor::Descriptor;
use crate::error::{FacetError, Result};
use crate::metric;
use serde::{Deserialize, Serialize};

/// Distance and similarity between two descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    /// Euclidean distance of the unit vectors, in [0, 2].
    pub distance: f32,
    /// Similarity in [0, 1]. Higher = more similar.
    pub similarity: f32,
}

impl MatchingResult {
    /// Compare two already-normalized vectors.
    ///
    /// A zero vector has no direction and matches nothing: distance 2, similarity 0.
    pub fn from_unit(a: &[f32], b: &[f32]) -> Self {
        if metric::is_zero(a) || metric::is_zero(b) {
            return Self {
                distance: 2.0,
                similarity: 0.0,
            };
        }
        let distance = metric::distance_sq(a, b).sqrt();
        Self {
            distance,
            similarity: metric::similarity_from_distance(distance),
        }
    }
}

/// Result of matching a probe against every member of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub matched: bool,
    /// Similarity of the best candidate, 0.0 when the batch is empty.
    pub similarity: f32,
    /// Batch position of the accepted candidate (if any).
    pub index: Option<usize>,
}

/// Strategy for comparing descriptors.
pub trait Matcher {
    fn match_pair(&self, first: &Descriptor, second: &Descriptor) -> Result<MatchingResult>;

    /// One result per batch member, in batch order.
    fn match_batch(&self, probe: &Descriptor, batch: &DescriptorBatch)
        -> Result<Vec<MatchingResult>>;

    /// One result per entry of `indices`, in the order of `indices`.
    fn match_compact(
        &self,
        probe: &Descriptor,
        batch: &DescriptorBatch,
        indices: &[usize],
    ) -> Result<Vec<MatchingResult>>;

    /// Batch-length output with results only at the selected positions.
    fn match_indexed(
        &self,
        probe: &Descriptor,
        batch: &DescriptorBatch,
        indices: &[usize],
    ) -> Result<Vec<Option<MatchingResult>>> {
        let compact = self.match_compact(probe, batch, indices)?;
        let mut out = vec![None; batch.len()];
        for (&i, result) in indices.iter().zip(compact) {
            out[i] = Some(result);
        }
        Ok(out)
    }

    /// Best candidate in the batch, accepted when it reaches `threshold` similarity.
    ///
    /// Every member is compared; there is no early exit on a good match.
    fn best_match(
        &self,
        probe: &Descriptor,
        batch: &DescriptorBatch,
        threshold: f32,
    ) -> Result<BestMatch> {
        let results = self.match_batch(probe, batch)?;
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, result) in results.iter().enumerate() {
            if result.similarity > best_sim {
                best_sim = result.similarity;
                best_idx = Some(i);
            }
        }

        Ok(match best_idx {
            Some(idx) if best_sim >= threshold => BestMatch {
                matched: true,
                similarity: best_sim,
                index: Some(idx),
            },
            _ => BestMatch {
                matched: false,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
                index: None,
            },
        })
    }
}

/// Matcher over L2-normalized descriptors (similarity = (1 + cos) / 2).
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl CosineMatcher {
    fn check_batch(probe: &Descriptor, batch: &DescriptorBatch) -> Result<()> {
        probe.ensure_compatible(batch.version(), batch.dimension())
    }
}

impl Matcher for CosineMatcher {
    fn match_pair(&self, first: &Descriptor, second: &Descriptor) -> Result<MatchingResult> {
        second.ensure_compatible(second.version(), None)?;
        first.ensure_compatible(second.version(), Some(second.dimension()))?;
        Ok(MatchingResult::from_unit(
            &first.normalized(),
            &second.normalized(),
        ))
    }

    fn match_batch(
        &self,
        probe: &Descriptor,
        batch: &DescriptorBatch,
    ) -> Result<Vec<MatchingResult>> {
        Self::check_batch(probe, batch)?;
        let unit = probe.normalized();
        Ok(batch
            .iter()
            .map(|values| MatchingResult::from_unit(&unit, &metric::l2_normalize(values)))
            .collect())
    }

    fn match_compact(
        &self,
        probe: &Descriptor,
        batch: &DescriptorBatch,
        indices: &[usize],
    ) -> Result<Vec<MatchingResult>> {
        Self::check_batch(probe, batch)?;
        let unit = probe.normalized();
        indices
            .iter()
            .map(|&i| {
                let values = batch.get(i).ok_or_else(|| {
                    FacetError::invalid_input(format!(
                        "subset index {i} out of range (batch len {})",
                        batch.len()
                    ))
                })?;
                Ok(MatchingResult::from_unit(&unit, &metric::l2_normalize(values)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor::new(1, values.to_vec())
    }

    fn batch(rows: &[&[f32]]) -> DescriptorBatch {
        let mut b = DescriptorBatch::new(rows.len(), 1);
        for row in rows {
            b.push(&desc(row)).unwrap();
        }
        b
    }

    #[test]
    fn test_self_match_identity() {
        let d = desc(&[0.3, -0.7, 0.1, 0.9]);
        let r = CosineMatcher.match_pair(&d, &d).unwrap();
        assert_eq!(r.distance, 0.0);
        assert_eq!(r.similarity, 1.0);
    }

    #[test]
    fn test_orthogonal_and_opposite() {
        let a = desc(&[1.0, 0.0]);
        let r = CosineMatcher.match_pair(&a, &desc(&[0.0, 2.0])).unwrap();
        assert!((r.similarity - 0.5).abs() < 1e-6);
        let r = CosineMatcher.match_pair(&a, &desc(&[-3.0, 0.0])).unwrap();
        assert!((r.distance - 2.0).abs() < 1e-6);
        assert!(r.similarity.abs() < 1e-6);
    }

    #[test]
    fn test_zero_descriptor_rejected() {
        let zero = desc(&[0.0, 0.0]);
        let unit = desc(&[1.0, 0.0]);
        for (a, b) in [(&zero, &unit), (&unit, &zero)] {
            let err = CosineMatcher.match_pair(a, b).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
        let err = CosineMatcher.match_batch(&zero, &batch(&[&[1.0, 0.0]])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_zero_vector_matches_nothing() {
        let r = MatchingResult::from_unit(&[1.0, 0.0], &[0.0, 0.0]);
        assert_eq!(r.distance, 2.0);
        assert_eq!(r.similarity, 0.0);
    }

    #[test]
    fn test_version_mismatch_reported() {
        let a = desc(&[1.0, 0.0]);
        let b = Descriptor::new(2, vec![1.0, 0.0]);
        let err = CosineMatcher.match_pair(&a, &b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleDescriptors);
    }

    #[test]
    fn test_match_batch_preserves_order() {
        let b = batch(&[&[0.0, 1.0], &[1.0, 0.0], &[1.0, 1.0]]);
        let results = CosineMatcher.match_batch(&desc(&[1.0, 0.0]), &b).unwrap();
        assert_eq!(results.len(), 3);
        assert!((results[0].similarity - 0.5).abs() < 1e-6);
        assert!((results[1].similarity - 1.0).abs() < 1e-6);
        assert!(results[2].similarity > results[0].similarity);
        assert!(results[2].similarity < results[1].similarity);
    }

    #[test]
    fn test_match_compact_follows_subset_order() {
        let b = batch(&[&[0.0, 1.0], &[1.0, 0.0], &[1.0, 1.0]]);
        let probe = desc(&[1.0, 0.0]);
        let full = CosineMatcher.match_batch(&probe, &b).unwrap();
        let compact = CosineMatcher.match_compact(&probe, &b, &[2, 0]).unwrap();
        assert_eq!(compact, vec![full[2], full[0]]);
    }

    #[test]
    fn test_match_indexed_fills_selected_slots() {
        let b = batch(&[&[0.0, 1.0], &[1.0, 0.0], &[1.0, 1.0]]);
        let probe = desc(&[1.0, 0.0]);
        let full = CosineMatcher.match_batch(&probe, &b).unwrap();
        let indexed = CosineMatcher.match_indexed(&probe, &b, &[1]).unwrap();
        assert_eq!(indexed, vec![None, Some(full[1]), None]);
    }

    #[test]
    fn test_match_compact_out_of_range() {
        let b = batch(&[&[0.0, 1.0]]);
        let err = CosineMatcher.match_compact(&desc(&[1.0, 0.0]), &b, &[3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_best_match_scans_whole_batch() {
        // best candidate is the last entry
        let b = batch(&[&[0.0, 1.0, 0.0], &[0.0, 0.0, 1.0], &[1.0, 0.0, 0.0]]);
        let best = CosineMatcher.best_match(&desc(&[1.0, 0.0, 0.0]), &b, 0.9).unwrap();
        assert!(best.matched);
        assert_eq!(best.index, Some(2));
        assert!((best.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_below_threshold() {
        let b = batch(&[&[0.0, 1.0]]);
        let best = CosineMatcher.best_match(&desc(&[1.0, 0.0]), &b, 0.9).unwrap();
        assert!(!best.matched);
        assert!((best.similarity - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_empty_batch() {
        let b = DescriptorBatch::new(4, 1);
        let best = CosineMatcher.best_match(&desc(&[1.0, 0.0]), &b, 0.5).unwrap();
        assert!(!best.matched);
        assert_eq!(best.similarity, 0.0);
    }
}
