//! HNSW insertion with bidirectional links and heuristic neighbor pruning.

use crate::index::graph::{GraphView, HnswGraph, Slot};
use crate::index::search::search_layer;
use crate::index::visited::VisitedSet;
use crate::metric;
use std::cmp::Ordering;
use std::collections::HashSet;

impl HnswGraph {
    /// Insert a vector at the next free position and return that position.
    /// The caller has already checked the dimension.
    pub(crate) fn insert(&mut self, raw: &[f32]) -> u32 {
        let id = self.slots.len() as u32;
        let level = self.level_for(id);
        let unit = metric::l2_normalize(raw);

        let Some(entry_point) = self.entry_point else {
            self.push_node(raw, &unit, vec![Vec::new(); level + 1], Slot::Live);
            self.entry_point = Some(id);
            self.max_layer = level;
            return id;
        };

        let mut visited = VisitedSet::new(self.slots.len());
        // Removed nodes stay reachable so the graph does not fragment.
        let any = |_: u32| true;

        // Greedy descent through the layers above the new node's level.
        let mut current = entry_point;
        for layer in (level + 1..=self.max_layer).rev() {
            let found = search_layer(
                &*self,
                &unit,
                std::slice::from_ref(&current),
                1,
                layer,
                &mut visited,
                &any,
            );
            if let Some(&(_, nearest)) = found.first() {
                current = nearest;
            }
        }

        let top = level.min(self.max_layer);
        let mut links: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut layer_eps = vec![current];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                &*self,
                &unit,
                &layer_eps,
                self.config.ef_construction,
                layer,
                &mut visited,
                &any,
            );
            let m_max = self.max_links(layer);
            links[layer] = select_neighbors(self, &candidates, m_max)
                .into_iter()
                .map(|(_, n)| n)
                .collect();

            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, n)| n));
            if layer_eps.is_empty() {
                layer_eps.push(entry_point);
            }
        }

        self.push_node(raw, &unit, links, Slot::Live);

        // Back-links, pruning neighbors that overflow their budget.
        for layer in 0..=top {
            let m_max = self.max_links(layer);
            let mine = self.neighbors[id as usize][layer].clone();
            for neighbor in mine {
                let nid = neighbor as usize;
                while self.neighbors[nid].len() <= layer {
                    self.neighbors[nid].push(Vec::new());
                }
                self.neighbors[nid][layer].push(id);

                if self.neighbors[nid][layer].len() > m_max {
                    let base = self.unit_vector(neighbor).to_vec();
                    let scored: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&c| (metric::distance_sq(&base, self.unit_vector(c)), c))
                        .collect();
                    self.neighbors[nid][layer] = select_neighbors(self, &scored, m_max)
                        .into_iter()
                        .map(|(_, n)| n)
                        .collect();
                }
            }
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
        id
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }
}

/// Diversity heuristic: keep a candidate only if it is closer to the base
/// than to every neighbor already kept, then top up with the closest rest.
fn select_neighbors(graph: &HnswGraph, candidates: &[(f32, u32)], m: usize) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let cvec = graph.unit_vector(cid);
        let diverse = selected.iter().all(|&(_, sid)| {
            dist_to_base <= metric::distance_sq(cvec, graph.unit_vector(sid))
        });
        if diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        let taken: HashSet<u32> = selected.iter().map(|&(_, id)| id).collect();
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !taken.contains(&cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}
