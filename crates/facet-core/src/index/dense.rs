//! Read-only index over the flattened graph layout.

use super::graph::{DenseGraph, GraphView};
use super::persistence::{self, DENSE_MAGIC};
use super::{descriptor_at, search_graph, Index, IndexConfig, SearchResult};
use crate::descriptor::Descriptor;
use crate::error::Result;
use std::path::Path;

/// Immutable descriptor index in the flattened graph layout.
#[derive(Debug, Clone)]
pub struct DenseIndex {
    graph: DenseGraph,
}

impl DenseIndex {
    pub(crate) fn from_graph(graph: DenseGraph) -> Self {
        Self { graph }
    }

    /// Load an index written by [`Index::save_to_dense_index`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut graph: DenseGraph = persistence::read_index_file(path, DENSE_MAGIC)?;
        graph.restore()?;
        tracing::info!(
            path = %path.display(),
            size = graph.live_count(),
            count = graph.slot_count(),
            version = graph.version(),
            "loaded dense index"
        );
        Ok(Self { graph })
    }

    pub fn config(&self) -> &IndexConfig {
        self.graph.config()
    }
}

impl Index for DenseIndex {
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
        persistence::write_index_file(path, DENSE_MAGIC, &self.graph)
    }
}
