// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Security index of a partition and its incremental maintenance.
//!
//! The security index relates how concentrated edges are inside
//! communities to how spread out the degree distribution is:
//!
//! ```text
//! SI = resistance / position_entropy
//! position_entropy = - Σ_v (deg(v)/2E) · log2(deg(v)/2E)
//! resistance       = - Σ_c (part_degree(c)/2E) · log2(part_volume(c)/2E)
//! ```
//!
//! `part_degree` is twice the number of edges inside a community and
//! `part_volume` the sum of its members' degrees. [`SecurityIndexTracker`]
//! keeps those aggregates for a fixed partition while single edges come
//! and go, so that previewing the effect of one edge costs O(1).

use std::cell::Cell;

use super::common::{community_slots, parts_by_label, resistance_term, xlog2x};
use crate::error::{ResistanceError, Result};
use crate::graph::{Edge, GraphView};

/// `- Σ_v (deg(v)/2E) · log2(deg(v)/2E)` over every node of `graph`.
pub fn position_entropy<G: GraphView>(graph: &G) -> f64 {
    let total = 2 * graph.total_weight();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -(0..graph.node_count())
        .map(|node| xlog2x(graph.degree(node) as f64 / total))
        .sum::<f64>()
}

/// `(volume, internal edge weight)` of every community slot, and `2E`.
fn part_statistics<G: GraphView>(
    graph: &G,
    membership: &[usize],
) -> Result<(Vec<(u64, u64)>, u64)> {
    let slots = community_slots(membership, graph.node_count())?;
    let total = 2 * graph.total_weight();
    if total == 0 {
        return Err(ResistanceError::invalid(
            "the security index is undefined for a graph without edges",
        ));
    }
    let stats = parts_by_label(membership, slots)
        .iter()
        .map(|members| {
            let volume = members.iter().map(|&node| graph.degree(node)).sum::<u64>();
            (volume, graph.induced_edge_count(members))
        })
        .collect();
    Ok((stats, total))
}

fn ratio(resistance: f64, entropy: f64) -> f64 {
    if entropy == 0.0 {
        0.0
    } else {
        resistance / entropy
    }
}

/// Security index computed from scratch.
pub fn security_index<G: GraphView>(graph: &G, membership: &[usize]) -> Result<f64> {
    let (stats, total) = part_statistics(graph, membership)?;
    let resistance = stats
        .iter()
        .map(|&(volume, internal)| resistance_term(2 * internal, volume, total))
        .sum::<f64>();
    Ok(ratio(resistance, position_entropy(graph)))
}

/// Variant that also rewards the boundary of each community.
///
/// With volume `v` and boundary `g = v - 2·internal`, each community adds
/// `(v-g)/2E·log2(2E/v) + g/2E·log2(2E/(2E-v))`.
pub fn security_index_boundary_weighted<G: GraphView>(
    graph: &G,
    membership: &[usize],
) -> Result<f64> {
    let (stats, total) = part_statistics(graph, membership)?;
    let sum = stats
        .iter()
        .map(|&(volume, internal)| {
            let boundary = volume - 2 * internal;
            resistance_term(volume - boundary, volume, total)
                + resistance_term(boundary, total - volume, total)
        })
        .sum::<f64>();
    Ok(ratio(sum, position_entropy(graph)))
}

/// Variant that penalizes the boundary: `(v-2g)/2E·log2(2E/v)` per
/// community. Communities whose boundary outweighs half their volume pull
/// the index down.
pub fn security_index_boundary_penalized<G: GraphView>(
    graph: &G,
    membership: &[usize],
) -> Result<f64> {
    let (stats, total) = part_statistics(graph, membership)?;
    let total_f = total as f64;
    let sum = stats
        .iter()
        .filter(|&&(volume, _)| volume > 0)
        .map(|&(volume, internal)| {
            let boundary = volume as f64 - 2.0 * internal as f64;
            let weight = volume as f64 - 2.0 * boundary;
            weight / total_f * (total_f / volume as f64).log2()
        })
        .sum::<f64>();
    Ok(ratio(sum, position_entropy(graph)))
}

/// Volume entropy of the partition over position entropy:
/// `Σ_c v/2E·log2(2E/v)` divided by `position_entropy`.
///
/// Only degrees enter this variant, which makes it the cheap score the
/// edge selection heuristic compares candidates with.
pub fn security_index_volume_entropy<G: GraphView>(
    graph: &G,
    membership: &[usize],
) -> Result<f64> {
    let slots = community_slots(membership, graph.node_count())?;
    let total = 2 * graph.total_weight();
    if total == 0 {
        return Err(ResistanceError::invalid(
            "the security index is undefined for a graph without edges",
        ));
    }
    let mut volumes = vec![0; slots];
    for (node, &part) in membership.iter().enumerate() {
        volumes[part] += graph.degree(node);
    }
    let sum = volumes
        .iter()
        .map(|&volume| resistance_term(volume, volume, total))
        .sum::<f64>();
    Ok(ratio(sum, position_entropy(graph)))
}

// ========================
// Incremental tracker
// ========================

/// Position entropy and resistance evaluated over the degrees of the
/// current graph but against a prospective total degree.
#[derive(Clone, Copy, Debug)]
struct PreCount {
    total_degree: u64,
    position_entropy: f64,
    resistance: f64,
}

/// Incrementally maintained security index for a fixed partition.
///
/// Previews reuse one O(n) pre-count per prospective edge count; the cache
/// is dropped on every commit or rebind.
#[derive(Clone, Debug)]
pub struct SecurityIndexTracker {
    membership: Vec<usize>,
    parts_degree: Vec<u64>,
    parts_volume: Vec<u64>,
    degree_distribute: Vec<u64>,
    edge_count: u64,
    pre: Cell<Option<PreCount>>,
}

impl SecurityIndexTracker {
    /// Compute every aggregate from scratch in O(E).
    pub fn initialize<G: GraphView>(graph: &G, membership: &[usize]) -> Result<Self> {
        let mut tracker = SecurityIndexTracker {
            membership: Vec::new(),
            parts_degree: Vec::new(),
            parts_volume: Vec::new(),
            degree_distribute: Vec::new(),
            edge_count: 0,
            pre: Cell::new(None),
        };
        tracker.rebind(graph, membership)?;
        Ok(tracker)
    }

    /// Drop every aggregate and recompute them against a new partition.
    pub fn rebind<G: GraphView>(&mut self, graph: &G, membership: &[usize]) -> Result<()> {
        let (stats, _) = part_statistics(graph, membership)?;
        self.parts_volume = stats.iter().map(|&(volume, _)| volume).collect();
        self.parts_degree = stats.iter().map(|&(_, internal)| 2 * internal).collect();
        self.degree_distribute = (0..graph.node_count()).map(|v| graph.degree(v)).collect();
        self.edge_count = graph.total_weight();
        self.membership = membership.to_vec();
        self.pre.set(None);
        Ok(())
    }

    pub fn membership(&self) -> &[usize] {
        &self.membership
    }

    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    /// Twice the internal edge count of every community.
    pub fn parts_degree(&self) -> &[u64] {
        &self.parts_degree
    }

    /// Sum of member degrees of every community.
    pub fn parts_volume(&self) -> &[u64] {
        &self.parts_volume
    }

    /// Current degree of every node.
    pub fn degree_distribute(&self) -> &[u64] {
        &self.degree_distribute
    }

    /// Security index of the current aggregates.
    pub fn value(&self) -> f64 {
        let pre = self.pre_count(2 * self.edge_count);
        ratio(pre.resistance, pre.position_entropy)
    }

    /// Security index the graph would have after adding (`is_add`) or
    /// removing `edge`, without changing the aggregates.
    pub fn preview(&self, edge: Edge, is_add: bool) -> Result<f64> {
        let (src, des) = self.check_edge(edge, is_add)?;
        let total = self.total_after(is_add)?;
        let pre = self.pre_count(total);
        let total_f = total as f64;

        let shift = |degree: u64| if is_add { degree + 1 } else { degree - 1 };
        let position_entropy = pre.position_entropy
            + [src, des]
                .iter()
                .map(|&node| {
                    let degree = self.degree_distribute[node];
                    xlog2x(degree as f64 / total_f) - xlog2x(shift(degree) as f64 / total_f)
                })
                .sum::<f64>();

        let src_com = self.membership[src];
        let des_com = self.membership[des];
        let differ = if src_com == des_com {
            let volume = self.parts_volume[src_com];
            let degree = self.parts_degree[src_com];
            let (volume_after, degree_after) = if is_add {
                (volume + 2, degree + 2)
            } else {
                (volume - 2, degree - 2)
            };
            resistance_term(degree_after, volume_after, total)
                - resistance_term(degree, volume, total)
        } else {
            [src_com, des_com]
                .iter()
                .map(|&part| {
                    let volume = self.parts_volume[part];
                    let degree = self.parts_degree[part];
                    resistance_term(degree, shift(volume), total)
                        - resistance_term(degree, volume, total)
                })
                .sum::<f64>()
        };

        Ok(ratio(pre.resistance + differ, position_entropy))
    }

    /// Apply the effect of adding (`is_add`) or removing `edge` to the
    /// aggregates.
    pub fn commit(&mut self, edge: Edge, is_add: bool) -> Result<()> {
        let (src, des) = self.check_edge(edge, is_add)?;
        self.total_after(is_add)?;
        let src_com = self.membership[src];
        let des_com = self.membership[des];

        if is_add {
            if src_com == des_com {
                self.parts_degree[src_com] += 2;
            }
            self.parts_volume[src_com] += 1;
            self.parts_volume[des_com] += 1;
            self.degree_distribute[src] += 1;
            self.degree_distribute[des] += 1;
            self.edge_count += 1;
        } else {
            if src_com == des_com {
                self.parts_degree[src_com] -= 2;
            }
            self.parts_volume[src_com] -= 1;
            self.parts_volume[des_com] -= 1;
            self.degree_distribute[src] -= 1;
            self.degree_distribute[des] -= 1;
            self.edge_count -= 1;
        }
        self.pre.set(None);
        Ok(())
    }

    fn check_edge(&self, (src, des): Edge, is_add: bool) -> Result<Edge> {
        let n = self.degree_distribute.len();
        if src >= n || des >= n || src == des {
            return Err(ResistanceError::invalid(format!(
                "({src}, {des}) is not an edge between two distinct nodes of [0, {n})"
            )));
        }
        if !is_add && (self.degree_distribute[src] == 0 || self.degree_distribute[des] == 0) {
            return Err(ResistanceError::invalid(format!(
                "edge ({src}, {des}) cannot be removed from a node without edges"
            )));
        }
        if !is_add
            && self.membership[src] == self.membership[des]
            && self.parts_degree[self.membership[src]] < 2
        {
            return Err(ResistanceError::invalid(format!(
                "edge ({src}, {des}) is not inside its community"
            )));
        }
        Ok((src, des))
    }

    fn total_after(&self, is_add: bool) -> Result<u64> {
        let total = 2 * self.edge_count;
        if is_add {
            Ok(total + 2)
        } else if total > 2 {
            Ok(total - 2)
        } else {
            Err(ResistanceError::invalid(
                "the security index is undefined for a graph without edges",
            ))
        }
    }

    /// Cached position entropy and resistance of the current degrees and
    /// aggregates measured against `total_degree`.
    fn pre_count(&self, total_degree: u64) -> PreCount {
        if let Some(pre) = self.pre.get() {
            if pre.total_degree == total_degree {
                return pre;
            }
        }
        let total = total_degree as f64;
        let position_entropy = if total_degree == 0 {
            0.0
        } else {
            -self
                .degree_distribute
                .iter()
                .map(|&degree| xlog2x(degree as f64 / total))
                .sum::<f64>()
        };
        let resistance = self
            .parts_degree
            .iter()
            .zip(&self.parts_volume)
            .map(|(&degree, &volume)| resistance_term(degree, volume, total_degree))
            .sum::<f64>();
        let pre = PreCount {
            total_degree,
            position_entropy,
            resistance,
        };
        self.pre.set(Some(pre));
        pre
    }
}
