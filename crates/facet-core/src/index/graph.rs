//! Graph storage for descriptor indexes.
//!
//! [`HnswGraph`] is the mutable form: per-node adjacency lists that grow as
//! descriptors are appended. [`DenseGraph`] is the immutable form: the same
//! topology flattened into offset tables and one contiguous link arena.
//! Both expose the [`GraphView`] that search runs over, so a graph and its
//! flattened copy answer every query identically.

use crate::error::{FacetError, Result};
use crate::index::config::IndexConfig;
use crate::metric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Read access shared by both graph layouts.
pub(crate) trait GraphView {
    fn config(&self) -> &IndexConfig;
    fn version(&self) -> u32;
    fn dimension(&self) -> usize;
    /// Every position ever assigned, removed ones included.
    fn slot_count(&self) -> usize;
    fn live_count(&self) -> usize;
    fn is_live(&self, id: u32) -> bool;
    fn unit_vector(&self, id: u32) -> &[f32];
    fn raw_vector(&self, id: u32) -> &[f32];
    fn neighbors(&self, id: u32, layer: usize) -> &[u32];
    fn entry_point(&self) -> Option<u32>;
    fn max_layer(&self) -> usize;
}

/// State of a position in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Slot {
    Live,
    /// Removed after insertion; still used for navigation, never returned.
    Removed,
    /// Removed before the index was built; never part of the graph.
    Vacant,
}

fn normalize_arena(raw: &[f32], dimension: usize) -> Vec<f32> {
    let mut units = Vec::with_capacity(raw.len());
    if dimension > 0 {
        for row in raw.chunks_exact(dimension) {
            units.extend(metric::l2_normalize(row));
        }
    }
    units
}

/// Mutable HNSW graph with per-node adjacency lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HnswGraph {
    pub(super) config: IndexConfig,
    pub(super) version: u32,
    pub(super) dimension: usize,
    pub(super) raw_vectors: Vec<f32>,
    // rebuilt from raw_vectors after deserialization
    #[serde(skip)]
    pub(super) unit_vectors: Vec<f32>,
    /// `[node][layer][neighbor]`
    pub(super) neighbors: Vec<Vec<Vec<u32>>>,
    pub(super) slots: Vec<Slot>,
    pub(super) entry_point: Option<u32>,
    pub(super) max_layer: usize,
    pub(super) live: usize,
}

impl HnswGraph {
    pub(crate) fn new(config: IndexConfig, version: u32, dimension: usize) -> Self {
        Self {
            config,
            version,
            dimension,
            raw_vectors: Vec::new(),
            unit_vectors: Vec::new(),
            neighbors: Vec::new(),
            slots: Vec::new(),
            entry_point: None,
            max_layer: 0,
            live: 0,
        }
    }

    /// Layer for the node at `id`, drawn from an exponential distribution
    /// seeded by `(config.seed, id)`.
    pub(super) fn level_for(&self, id: u32) -> usize {
        let mut rng =
            StdRng::seed_from_u64(self.config.seed ^ (id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let r: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        let ml = 1.0 / (self.config.m as f64).ln();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    pub(super) fn push_node(&mut self, raw: &[f32], unit: &[f32], links: Vec<Vec<u32>>, slot: Slot) {
        self.raw_vectors.extend_from_slice(raw);
        self.unit_vectors.extend_from_slice(unit);
        self.neighbors.push(links);
        self.slots.push(slot);
        if slot == Slot::Live {
            self.live += 1;
        }
    }

    /// Reserve a position that never joins the graph.
    pub(crate) fn push_vacant(&mut self) -> u32 {
        let id = self.slots.len() as u32;
        let zeros = vec![0.0f32; self.dimension];
        self.push_node(&zeros, &zeros, Vec::new(), Slot::Vacant);
        id
    }

    pub(crate) fn remove(&mut self, id: u32) -> Result<()> {
        match self.slots.get(id as usize) {
            Some(Slot::Live) => {
                self.slots[id as usize] = Slot::Removed;
                self.live -= 1;
                Ok(())
            }
            Some(_) => Err(FacetError::invalid_input(format!(
                "position {id} was already removed"
            ))),
            None => Err(FacetError::invalid_input(format!(
                "position {id} out of range (count {})",
                self.slots.len()
            ))),
        }
    }

    /// Rebuild derived state and check structural consistency after loading.
    pub(crate) fn restore(&mut self) -> Result<()> {
        self.config.validate()?;
        let slots = self.slots.len();
        if slots.checked_mul(self.dimension) != Some(self.raw_vectors.len())
            || self.neighbors.len() != slots
        {
            return Err(FacetError::corrupted("dynamic index arenas disagree on node count"));
        }
        for links in &self.neighbors {
            if links.iter().flatten().any(|&n| n as usize >= slots) {
                return Err(FacetError::corrupted("neighbor id out of range"));
            }
        }
        let inserted = self.slots.iter().any(|s| *s != Slot::Vacant);
        check_entry_point(self.entry_point, slots, inserted)?;
        let live = self.slots.iter().filter(|s| **s == Slot::Live).count();
        if live != self.live {
            return Err(FacetError::corrupted("live count disagrees with slot table"));
        }
        self.unit_vectors = normalize_arena(&self.raw_vectors, self.dimension);
        Ok(())
    }
}

/// A graph with any inserted node must have an in-range entry point.
fn check_entry_point(entry_point: Option<u32>, slots: usize, inserted: bool) -> Result<()> {
    match entry_point {
        Some(ep) if ep as usize >= slots => Err(FacetError::corrupted("entry point out of range")),
        None if inserted => Err(FacetError::corrupted("graph has nodes but no entry point")),
        _ => Ok(()),
    }
}

impl GraphView for HnswGraph {
    fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn live_count(&self) -> usize {
        self.live
    }

    #[inline]
    fn is_live(&self, id: u32) -> bool {
        self.slots[id as usize] == Slot::Live
    }

    #[inline]
    fn unit_vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.unit_vectors[start..start + self.dimension]
    }

    fn raw_vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.raw_vectors[start..start + self.dimension]
    }

    #[inline]
    fn neighbors(&self, id: u32, layer: usize) -> &[u32] {
        self.neighbors[id as usize]
            .get(layer)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    fn max_layer(&self) -> usize {
        self.max_layer
    }
}

/// Immutable graph in a flattened layout.
///
/// Node `i` owns entries `node_offsets[i]..node_offsets[i + 1]` of
/// `layer_offsets`, one per layer it lives on; entry `e` owns
/// `links[layer_offsets[e]..layer_offsets[e + 1]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DenseGraph {
    config: IndexConfig,
    version: u32,
    dimension: usize,
    raw_vectors: Vec<f32>,
    #[serde(skip)]
    unit_vectors: Vec<f32>,
    live: Vec<bool>,
    node_offsets: Vec<u64>,
    layer_offsets: Vec<u64>,
    links: Vec<u32>,
    entry_point: Option<u32>,
    max_layer: usize,
    live_count: usize,
}

impl DenseGraph {
    pub(crate) fn from_graph(graph: &HnswGraph) -> Self {
        let total_layers: usize = graph.neighbors.iter().map(Vec::len).sum();
        let total_links: usize = graph.neighbors.iter().flatten().map(Vec::len).sum();

        let mut node_offsets = Vec::with_capacity(graph.neighbors.len() + 1);
        let mut layer_offsets = Vec::with_capacity(total_layers + 1);
        let mut links = Vec::with_capacity(total_links);

        for node in &graph.neighbors {
            node_offsets.push(layer_offsets.len() as u64);
            for layer in node {
                layer_offsets.push(links.len() as u64);
                links.extend_from_slice(layer);
            }
        }
        node_offsets.push(layer_offsets.len() as u64);
        layer_offsets.push(links.len() as u64);

        Self {
            config: graph.config.clone(),
            version: graph.version,
            dimension: graph.dimension,
            raw_vectors: graph.raw_vectors.clone(),
            unit_vectors: graph.unit_vectors.clone(),
            live: graph.slots.iter().map(|s| *s == Slot::Live).collect(),
            node_offsets,
            layer_offsets,
            links,
            entry_point: graph.entry_point,
            max_layer: graph.max_layer,
            live_count: graph.live,
        }
    }

    pub(crate) fn restore(&mut self) -> Result<()> {
        self.config.validate()?;
        let slots = self.live.len();
        let monotonic = |offsets: &[u64]| offsets.windows(2).all(|w| w[0] <= w[1]);
        let offset = |n: Option<&u64>| n.and_then(|&n| usize::try_from(n).ok());
        let consistent = slots.checked_mul(self.dimension) == Some(self.raw_vectors.len())
            && self.node_offsets.len() == slots + 1
            && self.node_offsets.first() == Some(&0)
            && offset(self.node_offsets.last()).and_then(|n| n.checked_add(1))
                == Some(self.layer_offsets.len())
            && self.layer_offsets.first() == Some(&0)
            && offset(self.layer_offsets.last()) == Some(self.links.len())
            && monotonic(&self.node_offsets)
            && monotonic(&self.layer_offsets);
        if !consistent {
            return Err(FacetError::corrupted("dense index offset tables are inconsistent"));
        }
        if self.links.iter().any(|&n| n as usize >= slots) {
            return Err(FacetError::corrupted("neighbor id out of range"));
        }
        let inserted = self.layer_offsets.len() > 1 || self.live_count > 0;
        check_entry_point(self.entry_point, slots, inserted)?;
        if self.live.iter().filter(|l| **l).count() != self.live_count {
            return Err(FacetError::corrupted("live count disagrees with slot table"));
        }
        self.unit_vectors = normalize_arena(&self.raw_vectors, self.dimension);
        Ok(())
    }
}

impl GraphView for DenseGraph {
    fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn slot_count(&self) -> usize {
        self.live.len()
    }

    fn live_count(&self) -> usize {
        self.live_count
    }

    #[inline]
    fn is_live(&self, id: u32) -> bool {
        self.live[id as usize]
    }

    #[inline]
    fn unit_vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.unit_vectors[start..start + self.dimension]
    }

    fn raw_vector(&self, id: u32) -> &[f32] {
        let start = id as usize * self.dimension;
        &self.raw_vectors[start..start + self.dimension]
    }

    #[inline]
    fn neighbors(&self, id: u32, layer: usize) -> &[u32] {
        let first = self.node_offsets[id as usize] as usize;
        let end = self.node_offsets[id as usize + 1] as usize;
        if first + layer >= end {
            return &[];
        }
        let e = first + layer;
        &self.links[self.layer_offsets[e] as usize..self.layer_offsets[e + 1] as usize]
    }

    fn entry_point(&self) -> Option<u32> {
        self.entry_point
    }

    fn max_layer(&self) -> usize {
        self.max_layer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(n: usize) -> HnswGraph {
        let mut graph = HnswGraph::new(IndexConfig::default(), 1, 3);
        for i in 0..n {
            let v = [i as f32, 1.0, (i * i) as f32];
            graph.insert(&v);
        }
        graph
    }

    #[test]
    fn test_level_is_deterministic() {
        let graph = HnswGraph::new(IndexConfig::default(), 1, 3);
        for id in 0..50 {
            assert_eq!(graph.level_for(id), graph.level_for(id));
            assert!(graph.level_for(id) < graph.config.max_layers);
        }
    }

    #[test]
    fn test_levels_mostly_zero() {
        let graph = HnswGraph::new(IndexConfig::default(), 1, 3);
        let zeros = (0..1000).filter(|&id| graph.level_for(id) == 0).count();
        // P(level 0) = 1 - 1/m = 0.9375 for m = 16
        assert!(zeros > 850, "zeros={zeros}");
    }

    #[test]
    fn test_remove_tracks_live_count() {
        let mut graph = graph_with(4);
        assert_eq!(graph.live_count(), 4);
        graph.remove(2).unwrap();
        assert_eq!(graph.live_count(), 3);
        assert!(!graph.is_live(2));
        assert!(graph.remove(2).is_err());
        assert!(graph.remove(9).is_err());
    }

    #[test]
    fn test_vacant_slot() {
        let mut graph = HnswGraph::new(IndexConfig::default(), 1, 2);
        assert_eq!(graph.push_vacant(), 0);
        assert_eq!(graph.slot_count(), 1);
        assert_eq!(graph.live_count(), 0);
        assert!(graph.neighbors(0, 0).is_empty());
        assert!(graph.remove(0).is_err());
    }

    #[test]
    fn test_dense_preserves_topology() {
        let mut graph = graph_with(30);
        graph.remove(5).unwrap();
        graph.push_vacant();
        let dense = DenseGraph::from_graph(&graph);
        assert_eq!(dense.slot_count(), graph.slot_count());
        assert_eq!(dense.live_count(), graph.live_count());
        for id in 0..graph.slot_count() as u32 {
            assert_eq!(dense.is_live(id), graph.is_live(id));
            for layer in 0..=graph.max_layer() + 1 {
                assert_eq!(dense.neighbors(id, layer), graph.neighbors(id, layer));
            }
        }
    }

    #[test]
    fn test_restore_rebuilds_unit_vectors() {
        let graph = graph_with(5);
        let bytes = bincode::serialize(&graph).unwrap();
        let mut back: HnswGraph = bincode::deserialize(&bytes).unwrap();
        assert!(back.unit_vectors.is_empty());
        back.restore().unwrap();
        assert_eq!(back.unit_vectors, graph.unit_vectors);
    }

    #[test]
    fn test_restore_rejects_bad_neighbor() {
        let mut graph = graph_with(3);
        graph.neighbors[0][0].push(99);
        assert!(graph.restore().is_err());
    }

    #[test]
    fn test_restore_rejects_oversized_dimension() {
        let mut graph = graph_with(3);
        graph.dimension = usize::MAX;
        assert!(graph.restore().is_err());

        let mut dense = DenseGraph::from_graph(&graph_with(3));
        dense.dimension = usize::MAX;
        assert!(dense.restore().is_err());
    }

    #[test]
    fn test_dense_restore_rejects_huge_offsets() {
        let mut dense = DenseGraph::from_graph(&graph_with(4));
        if let Some(last) = dense.node_offsets.last_mut() {
            *last = u64::MAX;
        }
        assert!(dense.restore().is_err());
    }

    #[test]
    fn test_dense_restore_rejects_truncated_links() {
        let mut dense = DenseGraph::from_graph(&graph_with(10));
        dense.links.pop();
        assert!(dense.restore().is_err());
    }
}
