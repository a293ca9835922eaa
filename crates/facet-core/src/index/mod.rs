//! Descriptor indexes: nearest-neighbor search over a set of descriptors.
//!
//! [`IndexBuilder`] collects descriptors and builds a [`DynamicIndex`], which
//! accepts appends and removals after construction. A [`DenseIndex`] is the
//! immutable, compact form of the same graph. Positions are assigned in
//! append order and are never reused, so a removed position stays invalid.

mod builder;
mod config;
mod dense;
mod dynamic;
mod graph;
mod insert;
mod persistence;
mod search;
mod visited;

pub use builder::IndexBuilder;
pub use config::IndexConfig;
pub use dense::DenseIndex;
pub use dynamic::DynamicIndex;

use crate::batch::DescriptorBatch;
use crate::descriptor::Descriptor;
use crate::error::{FacetError, Result};
use crate::metric;
use graph::GraphView;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Position of the stored descriptor.
    pub index: usize,
    pub distance: f32,
    pub similarity: f32,
}

/// Read side shared by dense and dynamic indexes.
pub trait Index {
    fn version(&self) -> u32;
    fn dimension(&self) -> usize;
    /// Number of live descriptors.
    fn size(&self) -> usize;
    /// Number of positions ever indexed, removed ones included.
    fn count_of_indexed_descriptors(&self) -> usize;
    /// Up to `max_results` hits ordered by decreasing similarity, ties by position.
    fn search(&self, query: &Descriptor, max_results: usize) -> Result<Vec<SearchResult>>;
    fn descriptor_by_index(&self, position: usize) -> Result<Descriptor>;
    fn save_to_dense_index(&self, path: &Path) -> Result<()>;
}

/// Mutation and dynamic serialization, available on [`DynamicIndex`].
pub trait MutableIndex: Index {
    fn append_descriptor(&mut self, descriptor: &Descriptor) -> Result<usize>;
    /// Append every batch member; returns the position of the first.
    fn append_batch(&mut self, batch: &DescriptorBatch) -> Result<usize>;
    fn remove_descriptor(&mut self, position: usize) -> Result<()>;
    fn save_to_dynamic_index(&self, path: &Path) -> Result<()>;
}

pub(crate) fn search_graph<G: GraphView>(
    graph: &G,
    query: &Descriptor,
    max_results: usize,
) -> Result<Vec<SearchResult>> {
    query.ensure_compatible(graph.version(), Some(graph.dimension()))?;
    let unit = query.normalized();
    let hits = search::knn_search(graph, &unit, max_results);
    tracing::debug!(
        k = max_results,
        returned = hits.len(),
        live = graph.live_count(),
        "index search"
    );
    Ok(hits
        .into_iter()
        .map(|(dist_sq, id)| {
            let distance = dist_sq.sqrt();
            SearchResult {
                index: id as usize,
                distance,
                similarity: metric::similarity_from_distance(distance),
            }
        })
        .collect())
}

pub(crate) fn descriptor_at<G: GraphView>(graph: &G, position: usize) -> Result<Descriptor> {
    if position >= graph.slot_count() {
        return Err(FacetError::invalid_input(format!(
            "position {position} out of range (count {})",
            graph.slot_count()
        )));
    }
    if !graph.is_live(position as u32) {
        return Err(FacetError::invalid_input(format!(
            "position {position} was removed"
        )));
    }
    Ok(Descriptor::new(
        graph.version(),
        graph.raw_vector(position as u32).to_vec(),
    ))
}
