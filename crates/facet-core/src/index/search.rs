//! Layer search and multi-layer k-NN over any [`GraphView`].
//!
//! Distances inside the graph are squared Euclidean distances between unit
//! vectors. Ties are broken by position so equal graphs give equal answers.

use crate::index::graph::GraphView;
use crate::index::visited::VisitedSet;
use crate::metric;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

thread_local! {
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// `(distance², id)` ordered by distance, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Scored(OrderedFloat<f32>, u32);

impl Scored {
    fn new(dist_sq: f32, id: u32) -> Self {
        Self(OrderedFloat(dist_sq), id)
    }
}

fn sort_scored(results: &mut [(f32, u32)]) {
    results.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });
}

/// Beam search on one layer. Returns up to `ef` accepted nodes closest to
/// `query`, nearest first. Rejected nodes are still traversed.
#[allow(clippy::too_many_arguments)]
pub(crate) fn search_layer<G: GraphView, F: Fn(u32) -> bool>(
    graph: &G,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    accept: &F,
) -> Vec<(f32, u32)> {
    visited.clear();
    let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<Scored> = BinaryHeap::with_capacity(ef + 1);
    let mut worst = f32::MAX;

    for &ep in entry_points {
        if !visited.insert(ep) {
            continue;
        }
        let dist = metric::distance_sq(query, graph.unit_vector(ep));
        candidates.push(Reverse(Scored::new(dist, ep)));
        if accept(ep) {
            results.push(Scored::new(dist, ep));
            if results.len() > ef {
                results.pop();
            }
            if results.len() >= ef {
                worst = results.peek().map_or(f32::MAX, |r| r.0 .0);
            }
        }
    }

    while let Some(Reverse(Scored(c_dist, c_id))) = candidates.pop() {
        if results.len() >= ef && c_dist.0 > worst {
            break;
        }

        for &neighbor in graph.neighbors(c_id, layer) {
            if !visited.insert(neighbor) {
                continue;
            }
            let dist = metric::distance_sq(query, graph.unit_vector(neighbor));
            if results.len() < ef || dist < worst {
                candidates.push(Reverse(Scored::new(dist, neighbor)));
                if accept(neighbor) {
                    results.push(Scored::new(dist, neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                    if results.len() >= ef {
                        worst = results.peek().map_or(f32::MAX, |r| r.0 .0);
                    }
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|Scored(d, id)| (d.0, id))
        .collect()
}

/// Exhaustive scan over live nodes.
fn exact_scan<G: GraphView>(graph: &G, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    let mut scored: Vec<(f32, u32)> = (0..graph.slot_count() as u32)
        .filter(|&id| graph.is_live(id))
        .map(|id| (metric::distance_sq(query, graph.unit_vector(id)), id))
        .collect();
    sort_scored(&mut scored);
    scored.truncate(k);
    scored
}

/// k nearest live nodes to a unit-length `query`, as `(distance², id)`.
///
/// When the live population fits in the search beam the graph is bypassed
/// and every node is compared.
pub(crate) fn knn_search<G: GraphView>(graph: &G, query: &[f32], k: usize) -> Vec<(f32, u32)> {
    if k == 0 || graph.live_count() == 0 {
        return Vec::new();
    }
    let ef = graph.config().ef_search.max(k);
    if graph.live_count() <= ef {
        return exact_scan(graph, query, k);
    }
    let Some(entry_point) = graph.entry_point() else {
        return Vec::new();
    };

    SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(graph.slot_count());

        let mut current = entry_point;
        let any = |_: u32| true;
        for layer in (1..=graph.max_layer()).rev() {
            let found = search_layer(
                graph,
                query,
                std::slice::from_ref(&current),
                1,
                layer,
                &mut *visited,
                &any,
            );
            if let Some(&(_, nearest)) = found.first() {
                current = nearest;
            }
        }

        let live = |id: u32| graph.is_live(id);
        let mut results = search_layer(
            graph,
            query,
            std::slice::from_ref(&current),
            ef,
            0,
            &mut *visited,
            &live,
        );
        sort_scored(&mut results);
        results.truncate(k);
        results
    })
}
