//! Staging area that collects descriptors before an index is built.

use super::dynamic::DynamicIndex;
use super::graph::HnswGraph;
use super::IndexConfig;
use crate::batch::DescriptorBatch;
use crate::descriptor::Descriptor;
use crate::error::{FacetError, Result};

/// Collects descriptors, then builds a [`DynamicIndex`] over them.
///
/// Positions are assigned in append order. A removed position keeps its
/// number in the built index but is never returned by a search.
#[derive(Debug, Clone, Default)]
pub struct IndexBuilder {
    config: IndexConfig,
    version: Option<u32>,
    dimension: Option<usize>,
    slots: Vec<Option<Vec<f32>>>,
}

impl IndexBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Number of appended descriptors that have not been removed.
    pub fn size(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of positions assigned so far.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn append_descriptor(&mut self, descriptor: &Descriptor) -> Result<usize> {
        match self.version {
            Some(version) => descriptor.ensure_compatible(version, self.dimension)?,
            None => descriptor.ensure_compatible(descriptor.version(), None)?,
        }
        self.version = Some(descriptor.version());
        self.dimension = Some(descriptor.dimension());
        self.slots.push(Some(descriptor.values().to_vec()));
        Ok(self.slots.len() - 1)
    }

    /// Append every member of `batch`; returns the position of the first.
    pub fn append_batch(&mut self, batch: &DescriptorBatch) -> Result<usize> {
        let start = self.slots.len();
        // A drained batch may still carry a dimension; it must not pin the builder.
        let Some(dimension) = batch.dimension().filter(|_| !batch.is_empty()) else {
            return Ok(start);
        };
        if let Some(version) = self.version {
            if batch.version() != version {
                return Err(FacetError::VersionMismatch {
                    expected: version,
                    actual: batch.version(),
                });
            }
        }
        if let Some(expected) = self.dimension {
            if dimension != expected {
                return Err(FacetError::DimensionMismatch {
                    expected,
                    actual: dimension,
                });
            }
        }
        self.version = Some(batch.version());
        self.dimension = Some(dimension);
        self.slots.extend(batch.iter().map(|values| Some(values.to_vec())));
        Ok(start)
    }

    pub fn remove_descriptor(&mut self, position: usize) -> Result<()> {
        let count = self.slots.len();
        match self.slots.get_mut(position) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            Some(None) => Err(FacetError::invalid_input(format!(
                "position {position} was already removed"
            ))),
            None => Err(FacetError::invalid_input(format!(
                "position {position} out of range (count {count})"
            ))),
        }
    }

    /// Build the graph. The builder is left untouched and can keep growing.
    pub fn build_index(&self) -> Result<DynamicIndex> {
        self.config.validate()?;
        let (Some(version), Some(dimension)) = (self.version, self.dimension) else {
            return Err(FacetError::invalid_input("no descriptors were appended"));
        };
        if self.is_empty() {
            return Err(FacetError::invalid_input("every appended descriptor was removed"));
        }
        if self.slots.len() > u32::MAX as usize {
            return Err(FacetError::invalid_input("too many descriptors for one index"));
        }

        let mut graph = HnswGraph::new(self.config.clone(), version, dimension);
        for slot in &self.slots {
            match slot {
                Some(values) => {
                    graph.insert(values);
                }
                None => {
                    graph.push_vacant();
                }
            }
        }
        tracing::info!(
            size = self.size(),
            count = self.slots.len(),
            version,
            dimension,
            "built index"
        );
        Ok(DynamicIndex::from_graph(graph))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::index::{Index, MutableIndex};

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor::new(46, values.to_vec())
    }

    #[test]
    fn test_positions_are_contiguous() {
        let mut builder = IndexBuilder::default();
        assert_eq!(builder.append_descriptor(&desc(&[1.0, 0.0])).unwrap(), 0);
        let mut batch = DescriptorBatch::new(4, 46);
        batch.push(&desc(&[0.0, 1.0])).unwrap();
        batch.push(&desc(&[1.0, 1.0])).unwrap();
        assert_eq!(builder.append_batch(&batch).unwrap(), 1);
        assert_eq!(builder.append_descriptor(&desc(&[0.5, 1.0])).unwrap(), 3);
        assert_eq!(builder.size(), 4);
    }

    #[test]
    fn test_empty_batch_returns_next_position() {
        let mut builder = IndexBuilder::default();
        builder.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        assert_eq!(builder.append_batch(&DescriptorBatch::new(4, 99)).unwrap(), 1);
        assert_eq!(builder.count(), 1);
    }

    #[test]
    fn test_drained_batch_does_not_pin_version() {
        let mut drained = DescriptorBatch::new(2, 9);
        drained.push(&Descriptor::new(9, vec![1.0, 2.0, 3.0])).unwrap();
        drained.remove_slow(0).unwrap();
        assert!(drained.is_empty());

        let mut builder = IndexBuilder::default();
        assert_eq!(builder.append_batch(&drained).unwrap(), 0);
        assert_eq!(builder.append_descriptor(&Descriptor::new(1, vec![1.0, 0.0])).unwrap(), 0);
        assert_eq!(builder.size(), 1);
    }

    #[test]
    fn test_zero_descriptor_rejected() {
        let mut builder = IndexBuilder::default();
        let err = builder.append_descriptor(&desc(&[0.0, 0.0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_build_empty_fails() {
        let err = IndexBuilder::default().build_index().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_build_all_removed_fails() {
        let mut builder = IndexBuilder::default();
        builder.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        builder.remove_descriptor(0).unwrap();
        assert!(builder.is_empty());
        assert_eq!(builder.build_index().unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_removed_position_is_kept_but_hidden() {
        let mut builder = IndexBuilder::default();
        for v in [[1.0, 0.0], [0.9, 0.1], [0.0, 1.0]] {
            builder.append_descriptor(&desc(&v)).unwrap();
        }
        builder.remove_descriptor(1).unwrap();
        let index = builder.build_index().unwrap();
        assert_eq!(index.size(), 2);
        assert_eq!(index.count_of_indexed_descriptors(), 3);
        assert_eq!(index.descriptor_by_index(2).unwrap(), desc(&[0.0, 1.0]));
        assert_eq!(
            index.descriptor_by_index(1).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        let hits = index.search(&desc(&[0.9, 0.1]), 3).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 0);
    }

    #[test]
    fn test_remove_unknown_position() {
        let mut builder = IndexBuilder::default();
        builder.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        assert_eq!(builder.remove_descriptor(3).unwrap_err().kind(), ErrorKind::InvalidInput);
        builder.remove_descriptor(0).unwrap();
        assert_eq!(builder.remove_descriptor(0).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_mixed_versions_rejected() {
        let mut builder = IndexBuilder::default();
        builder.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        let err = builder
            .append_descriptor(&Descriptor::new(52, vec![1.0, 0.0]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleDescriptors);
        let err = builder.append_descriptor(&desc(&[1.0, 0.0, 0.0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleDescriptors);
    }

    #[test]
    fn test_built_index_is_independent() {
        let mut builder = IndexBuilder::default();
        builder.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        let mut index = builder.build_index().unwrap();
        builder.append_descriptor(&desc(&[0.0, 1.0])).unwrap();
        assert_eq!(index.size(), 1);
        index.append_descriptor(&desc(&[0.5, 0.5])).unwrap();
        assert_eq!(builder.size(), 2);
        assert_eq!(index.size(), 2);
    }
}
