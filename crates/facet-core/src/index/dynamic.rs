//! Mutable index that accepts appends and removals after it is built.

use super::dense::DenseIndex;
use super::graph::{DenseGraph, GraphView, HnswGraph};
use super::persistence::{self, DENSE_MAGIC, DYNAMIC_MAGIC};
use super::{descriptor_at, search_graph, Index, IndexConfig, MutableIndex, SearchResult};
use crate::batch::DescriptorBatch;
use crate::descriptor::Descriptor;
use crate::error::{FacetError, Result};
use std::path::Path;

/// Descriptor index that accepts appends and removals after it is built.
#[derive(Debug, Clone)]
pub struct DynamicIndex {
    graph: HnswGraph,
}

impl DynamicIndex {
    /// An empty index for descriptors of the given version and dimension.
    pub fn new(config: IndexConfig, version: u32, dimension: usize) -> Result<Self> {
        config.validate()?;
        if dimension == 0 {
            return Err(FacetError::invalid_input("index dimension must be positive"));
        }
        Ok(Self {
            graph: HnswGraph::new(config, version, dimension),
        })
    }

    pub(crate) fn from_graph(graph: HnswGraph) -> Self {
        Self { graph }
    }

    /// Load an index written by [`MutableIndex::save_to_dynamic_index`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut graph: HnswGraph = persistence::read_index_file(path, DYNAMIC_MAGIC)?;
        graph.restore()?;
        tracing::info!(
            path = %path.display(),
            size = graph.live_count(),
            count = graph.slot_count(),
            version = graph.version(),
            "loaded dynamic index"
        );
        Ok(Self { graph })
    }

    pub fn config(&self) -> &IndexConfig {
        self.graph.config()
    }

    /// Freeze the current state into a dense index.
    pub fn to_dense(&self) -> DenseIndex {
        DenseIndex::from_graph(DenseGraph::from_graph(&self.graph))
    }
}

impl Index for DynamicIndex {
    fn version(&self) -> u32 {
        self.graph.version()
    }

    fn dimension(&self) -> usize {
        self.graph.dimension()
    }

    fn size(&self) -> usize {
        self.graph.live_count()
    }

    fn count_of_indexed_descriptors(&self) -> usize {
        self.graph.slot_count()
    }

    fn search(&self, query: &Descriptor, max_results: usize) -> Result<Vec<SearchResult>> {
        search_graph(&self.graph, query, max_results)
    }

    fn descriptor_by_index(&self, position: usize) -> Result<Descriptor> {
        descriptor_at(&self.graph, position)
    }

    fn save_to_dense_index(&self, path: &Path) -> Result<()> {
        persistence::write_index_file(path, DENSE_MAGIC, &DenseGraph::from_graph(&self.graph))
    }
}

impl MutableIndex for DynamicIndex {
    fn append_descriptor(&mut self, descriptor: &Descriptor) -> Result<usize> {
        descriptor.ensure_compatible(self.graph.version(), Some(self.graph.dimension()))?;
        if self.graph.slot_count() >= u32::MAX as usize {
            return Err(FacetError::invalid_input("index is out of positions"));
        }
        Ok(self.graph.insert(descriptor.values()) as usize)
    }

    fn append_batch(&mut self, batch: &DescriptorBatch) -> Result<usize> {
        let start = self.graph.slot_count();
        if batch.is_empty() {
            return Ok(start);
        }
        if batch.version() != self.graph.version() {
            return Err(FacetError::VersionMismatch {
                expected: self.graph.version(),
                actual: batch.version(),
            });
        }
        if batch.dimension() != Some(self.graph.dimension()) {
            return Err(FacetError::DimensionMismatch {
                expected: self.graph.dimension(),
                actual: batch.dimension().unwrap_or(0),
            });
        }
        for values in batch.iter() {
            self.graph.insert(values);
        }
        tracing::debug!(start, count = batch.len(), "appended batch to dynamic index");
        Ok(start)
    }

    fn remove_descriptor(&mut self, position: usize) -> Result<()> {
        let id = u32::try_from(position)
            .map_err(|_| FacetError::invalid_input(format!("position {position} out of range")))?;
        self.graph.remove(id)
    }

    fn save_to_dynamic_index(&self, path: &Path) -> Result<()> {
        persistence::write_index_file(path, DYNAMIC_MAGIC, &self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn desc(values: &[f32]) -> Descriptor {
        Descriptor::new(3, values.to_vec())
    }

    fn index() -> DynamicIndex {
        DynamicIndex::new(IndexConfig::default(), 3, 2).unwrap()
    }

    #[test]
    fn test_append_and_search() {
        let mut idx = index();
        assert_eq!(idx.append_descriptor(&desc(&[1.0, 0.0])).unwrap(), 0);
        assert_eq!(idx.append_descriptor(&desc(&[0.0, 1.0])).unwrap(), 1);
        let hits = idx.search(&desc(&[0.1, 1.0]), 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 1);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn test_search_self_is_exact() {
        let mut idx = index();
        idx.append_descriptor(&desc(&[0.6, 0.8])).unwrap();
        let hit = idx.search(&desc(&[0.6, 0.8]), 1).unwrap()[0];
        assert_eq!(hit.distance, 0.0);
        assert_eq!(hit.similarity, 1.0);
    }

    #[test]
    fn test_remove_changes_size_not_count() {
        let mut idx = index();
        for i in 0..3 {
            idx.append_descriptor(&desc(&[1.0, i as f32])).unwrap();
        }
        idx.remove_descriptor(1).unwrap();
        assert_eq!(idx.size(), 2);
        assert_eq!(idx.count_of_indexed_descriptors(), 3);
        let err = idx.descriptor_by_index(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(idx.descriptor_by_index(2).unwrap(), desc(&[1.0, 2.0]));
        assert_eq!(idx.append_descriptor(&desc(&[2.0, 2.0])).unwrap(), 3);
    }

    #[test]
    fn test_remove_twice_fails() {
        let mut idx = index();
        idx.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        idx.remove_descriptor(0).unwrap();
        assert_eq!(idx.remove_descriptor(0).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert_eq!(idx.remove_descriptor(5).unwrap_err().kind(), ErrorKind::InvalidInput);
        assert!(idx.search(&desc(&[1.0, 0.0]), 3).unwrap().is_empty());
    }

    #[test]
    fn test_cross_version_query_rejected() {
        let mut idx = index();
        idx.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        let err = idx.search(&Descriptor::new(4, vec![1.0, 0.0]), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleDescriptors);
        let err = idx.append_descriptor(&desc(&[1.0, 0.0, 0.0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleDescriptors);
    }

    #[test]
    fn test_append_batch_returns_start() {
        let mut idx = index();
        idx.append_descriptor(&desc(&[1.0, 0.0])).unwrap();
        let mut batch = DescriptorBatch::new(2, 3);
        batch.push(&desc(&[0.0, 1.0])).unwrap();
        batch.push(&desc(&[1.0, 1.0])).unwrap();
        assert_eq!(idx.append_batch(&batch).unwrap(), 1);
        assert_eq!(idx.size(), 3);
        assert_eq!(idx.descriptor_by_index(2).unwrap(), desc(&[1.0, 1.0]));
    }

    #[test]
    fn test_append_batch_version_mismatch() {
        let mut idx = index();
        let mut batch = DescriptorBatch::new(1, 9);
        batch.push(&Descriptor::new(9, vec![1.0, 0.0])).unwrap();
        assert_eq!(
            idx.append_batch(&batch).unwrap_err().kind(),
            ErrorKind::IncompatibleDescriptors
        );
    }

    #[test]
    fn test_to_dense_matches() {
        let mut idx = index();
        for i in 0..10 {
            let t = i as f32 * 0.5;
            idx.append_descriptor(&desc(&[t.cos(), t.sin()])).unwrap();
        }
        idx.remove_descriptor(4).unwrap();
        let dense = idx.to_dense();
        let q = desc(&[0.3, 0.9]);
        assert_eq!(dense.search(&q, 5).unwrap(), idx.search(&q, 5).unwrap());
        assert_eq!(dense.size(), 9);
        assert_eq!(dense.count_of_indexed_descriptors(), 10);
    }

    #[test]
    fn test_new_rejects_zero_dimension() {
        assert!(DynamicIndex::new(IndexConfig::default(), 3, 0).is_err());
    }
}
