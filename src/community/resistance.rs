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

//! Louvain-style optimization of the resistance objective.
//!
//! For a partition into communities `c` of a graph with total edge weight
//! `m`, resistance is
//!
//! ```text
//! R = - Σ_c (s_in[c] / 2m) · log2(s_tot[c] / 2m)
//! ```
//!
//! where `s_in[c]` is twice the internal edge weight of `c` (self-loops
//! included) and `s_tot[c]` is the sum of the weighted degrees of its
//! members. The optimizer alternates a local moving phase with an
//! aggregation phase until two successive passes reach exactly the same
//! objective value.

use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::common::{community_slots, group_by_labels, resistance_term};
use crate::error::{ResistanceError, Result};
use crate::graph::GraphView;

// Marks an old community id that has no dense index yet
const UNASSIGNED: usize = usize::MAX;

/// Optional caps on the optimizer loops.
///
/// Both default to `None`: passes run until the objective stops changing and
/// sweeps run until one of them moves no node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResistanceConfig {
    /// Maximum number of local moving + aggregation passes.
    pub max_passes: Option<usize>,
    /// Maximum number of sweeps over all nodes inside one local moving phase.
    pub max_sweeps: Option<usize>,
}

/// Outcome of a resistance optimization run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    /// Community of every original node, dense in `[0, k)`.
    pub membership: Vec<usize>,
    /// Objective value reached by the final partition.
    pub resistance: f64,
    /// Objective value after each completed pass, in order.
    pub history: Vec<f64>,
}

impl Detection {
    /// Communities as lists of original node ids, ordered by their smallest
    /// member.
    pub fn communities(&self) -> Vec<Vec<usize>> {
        group_by_labels(&self.membership)
    }

    pub fn community_count(&self) -> usize {
        self.membership.iter().copied().max().map_or(0, |max| max + 1)
    }

    pub fn passes(&self) -> usize {
        self.history.len()
    }
}

// ========================
// Core Data Structures
// ========================

/// One level of the coarsening hierarchy.
#[derive(Clone, Debug)]
struct Level {
    /// Weighted degree; a self-loop of weight `w` counts `2w`.
    k: Vec<u64>,
    /// Self-loop weight.
    w: Vec<u64>,
    /// Incident edges without self-loops, as `(neighbor, weight)`.
    adj: Vec<Vec<(usize, u64)>>,
    /// Original nodes folded into each node of this level.
    members: Vec<Vec<usize>>,
}

impl Level {
    fn from_graph<G: GraphView>(graph: &G) -> Self {
        let n = graph.node_count();
        let mut w = vec![0; n];
        let mut adj = vec![Vec::new(); n];
        for u in 0..n {
            for v in graph.neighbors(u) {
                let weight = graph.edge_weight(u, v).unwrap_or(0);
                if u == v {
                    w[u] = weight;
                } else {
                    adj[u].push((v, weight));
                }
            }
        }
        let k = (0..n)
            .map(|u| 2 * w[u] + adj[u].iter().map(|&(_, weight)| weight).sum::<u64>())
            .collect();
        Level {
            k,
            w,
            adj,
            members: (0..n).map(|node| vec![node]).collect(),
        }
    }

    fn len(&self) -> usize {
        self.k.len()
    }
}

/// Community assignment of one level plus the per-community aggregates.
///
/// Community ids are node ids of the level, so every vector has one slot
/// per node.
#[derive(Clone, Debug)]
struct PartitionState {
    community: Vec<usize>,
    s_in: Vec<u64>,
    s_tot: Vec<u64>,
}

impl PartitionState {
    fn singletons(level: &Level) -> Self {
        PartitionState {
            community: (0..level.len()).collect(),
            s_in: level.w.iter().map(|&loops| 2 * loops).collect(),
            s_tot: level.k.clone(),
        }
    }

    /// Resistance of the partition. Communities are visited in the order
    /// they are first met when scanning nodes, which is also the order the
    /// aggregation pass numbers them in.
    fn resistance(&self, m2: u64) -> f64 {
        let mut seen = FixedBitSet::with_capacity(self.community.len());
        let mut total = 0.0;
        for &c in &self.community {
            if seen.put(c) {
                continue;
            }
            total += resistance_term(self.s_in[c], self.s_tot[c], m2);
        }
        total
    }

    fn count(&self) -> usize {
        let mut seen = FixedBitSet::with_capacity(self.community.len());
        self.community.iter().filter(|&&c| !seen.put(c)).count()
    }
}

// ========================
// Phase 1: local moving
// ========================

/// Move nodes between neighboring communities until a full sweep makes no
/// move.
///
/// A node is first taken out of its community. Its gain for a candidate
/// community is measured against leaving it isolated, whose resistance is
/// the closed-form term of its own self-loop weight. The node joins the
/// candidate with the strictly greatest positive gain; ties go to the
/// community met first in neighbor order. Without a positive gain it goes
/// back home.
fn local_moving(level: &Level, m2: u64, max_sweeps: Option<usize>) -> PartitionState {
    let mut state = PartitionState::singletons(level);
    let mut shared: IndexMap<usize, u64> = IndexMap::new();
    let mut sweeps = 0;

    loop {
        let mut moves = 0;
        for node in 0..level.len() {
            let home = state.community[node];
            let degree = level.k[node];
            let loops = level.w[node];

            shared.clear();
            for &(neighbor, weight) in &level.adj[node] {
                *shared.entry(state.community[neighbor]).or_insert(0) += weight;
            }
            let home_links = shared.get(&home).copied().unwrap_or(0);

            state.s_in[home] -= 2 * (home_links + loops);
            state.s_tot[home] -= degree;

            let isolated = resistance_term(2 * loops, degree, m2);
            let mut best = home;
            let mut best_gain = 0.0;
            let mut best_links = home_links;

            for (&candidate, &links) in &shared {
                let s_in = state.s_in[candidate];
                let s_tot = state.s_tot[candidate];
                let joined = resistance_term(s_in + 2 * (links + loops), s_tot + degree, m2);
                let gain = joined - resistance_term(s_in, s_tot, m2) - isolated;
                if gain > best_gain {
                    best = candidate;
                    best_gain = gain;
                    best_links = links;
                }
            }

            state.s_in[best] += 2 * (best_links + loops);
            state.s_tot[best] += degree;
            state.community[node] = best;
            if best != home {
                moves += 1;
            }
        }

        sweeps += 1;
        trace!(sweep = sweeps, moves, "local moving sweep");
        if moves == 0 || max_sweeps.is_some_and(|cap| sweeps >= cap) {
            break;
        }
    }

    debug_assert!(state.s_in.iter().zip(&state.s_tot).all(|(s_in, s_tot)| s_in <= s_tot));
    state
}

// ========================
// Phase 2: aggregation
// ========================

/// Collapse every community into one node of a new level.
///
/// Communities are numbered densely in the order they are first met when
/// scanning nodes. Edges inside a community become a self-loop.
fn aggregate(level: &Level, state: &PartitionState) -> Level {
    let n = level.len();
    let mut relabel = vec![UNASSIGNED; n];
    let mut next = 0;
    for &c in &state.community {
        if relabel[c] == UNASSIGNED {
            relabel[c] = next;
            next += 1;
        }
    }

    let mut k = vec![0; next];
    let mut w = vec![0; next];
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); next];
    let mut rows: Vec<IndexMap<usize, u64>> = vec![IndexMap::new(); next];

    for u in 0..n {
        let cu = relabel[state.community[u]];
        k[cu] += level.k[u];
        w[cu] += level.w[u];
        members[cu].extend_from_slice(&level.members[u]);

        for &(v, weight) in &level.adj[u] {
            // adjacency holds both directions; take each edge once
            if u > v {
                continue;
            }
            let cv = relabel[state.community[v]];
            if cu == cv {
                w[cu] += weight;
            } else {
                *rows[cu].entry(cv).or_insert(0) += weight;
                *rows[cv].entry(cu).or_insert(0) += weight;
            }
        }
    }

    Level {
        k,
        w,
        adj: rows.into_iter().map(|row| row.into_iter().collect()).collect(),
        members,
    }
}

// ========================
// Driver
// ========================

/// Runs resistance optimization over any [`GraphView`].
///
/// The optimizer keeps no state between runs and never mutates its input.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResistanceOptimizer {
    config: ResistanceConfig,
}

impl ResistanceOptimizer {
    pub fn new(config: ResistanceConfig) -> Self {
        ResistanceOptimizer { config }
    }

    pub fn config(&self) -> &ResistanceConfig {
        &self.config
    }

    /// Partition the nodes of `graph` and report the objective reached.
    ///
    /// # Errors
    /// `InvalidInput` when the graph has no edges, since the objective
    /// divides by the total edge weight.
    pub fn run<G: GraphView>(&self, graph: &G) -> Result<Detection> {
        let mut level = Level::from_graph(graph);
        let m2: u64 = level.k.iter().sum();
        if m2 == 0 {
            return Err(ResistanceError::invalid(
                "resistance is undefined for a graph without edges",
            ));
        }

        let mut history = Vec::new();
        let mut previous = None;
        let resistance = loop {
            let state = local_moving(&level, m2, self.config.max_sweeps);
            let value = state.resistance(m2);
            debug!(
                pass = history.len() + 1,
                nodes = level.len(),
                communities = state.count(),
                resistance = value,
                "resistance pass"
            );
            if previous == Some(value) {
                break value;
            }

            level = aggregate(&level, &state);
            history.push(value);
            previous = Some(value);
            if self.config.max_passes.is_some_and(|cap| history.len() >= cap) {
                break value;
            }
        };

        let mut membership = vec![0; graph.node_count()];
        for (community, members) in level.members.iter().enumerate() {
            for &node in members {
                membership[node] = community;
            }
        }

        Ok(Detection {
            membership,
            resistance,
            history,
        })
    }
}

/// Run the optimizer with the default configuration.
pub fn resistance_communities<G: GraphView>(graph: &G) -> Result<Detection> {
    ResistanceOptimizer::default().run(graph)
}

// ========================
// Partition scores
// ========================

/// `(s_in, s_tot)` of every community slot and `2m`.
fn community_weights<G: GraphView>(
    graph: &G,
    membership: &[usize],
) -> Result<(Vec<u64>, Vec<u64>, u64)> {
    let slots = community_slots(membership, graph.node_count())?;
    let m2 = 2 * graph.total_weight();
    if m2 == 0 {
        return Err(ResistanceError::invalid(
            "partition scores are undefined for a graph without edges",
        ));
    }

    let mut s_in = vec![0; slots];
    let mut s_tot = vec![0; slots];
    for (u, &cu) in membership.iter().enumerate() {
        s_tot[cu] += graph.degree(u);
        for v in graph.neighbors(u) {
            if membership[v] != cu {
                continue;
            }
            let weight = graph.edge_weight(u, v).unwrap_or(0);
            // other edges are seen once from each endpoint
            s_in[cu] += if u == v { 2 * weight } else { weight };
        }
    }
    Ok((s_in, s_tot, m2))
}

/// Resistance of an arbitrary membership vector over `graph`.
pub fn resistance<G: GraphView>(graph: &G, membership: &[usize]) -> Result<f64> {
    let (s_in, s_tot, m2) = community_weights(graph, membership)?;
    let mut seen = FixedBitSet::with_capacity(s_in.len());
    Ok(membership
        .iter()
        .filter(|&&c| !seen.put(c))
        .map(|&c| resistance_term(s_in[c], s_tot[c], m2))
        .sum())
}

/// Newman modularity `Σ_c s_in/2m - (s_tot/2m)²` of a membership vector.
pub fn modularity<G: GraphView>(graph: &G, membership: &[usize]) -> Result<f64> {
    let (s_in, s_tot, m2) = community_weights(graph, membership)?;
    let m2 = m2 as f64;
    Ok(s_in
        .iter()
        .zip(&s_tot)
        .map(|(&s_in, &s_tot)| s_in as f64 / m2 - (s_tot as f64 / m2).powi(2))
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::WeightedGraph;

    const EPS: f64 = 1e-12;

    fn bridged_triangles() -> WeightedGraph {
        WeightedGraph::from_edges(6, &[(0, 1), (0, 2), (1, 2), (3, 4), (3, 5), (4, 5), (2, 3)])
            .unwrap()
    }

    fn assert_valid(detection: &Detection, n: usize) {
        assert_eq!(detection.membership.len(), n);
        let k = detection.community_count();
        assert!(k <= n);
        let mut covered = vec![false; n];
        for community in detection.communities() {
            assert!(!community.is_empty());
            for node in community {
                assert!(!covered[node]);
                covered[node] = true;
            }
        }
        assert!(covered.into_iter().all(|c| c));
        assert!(detection.membership.iter().all(|&c| c < k));
    }

    #[test]
    fn triangle_is_scored_consistently() {
        let graph = WeightedGraph::from_edges(3, &[(0, 1), (0, 2), (1, 2)]).unwrap();
        let detection = resistance_communities(&graph).unwrap();
        assert_valid(&detection, 3);
        // a single community has zero resistance; pairing two nodes scores higher
        assert_eq!(resistance(&graph, &[0, 0, 0]).unwrap(), 0.0);
        assert_eq!(detection.membership, vec![0, 0, 1]);
        assert!((detection.resistance - 0.194_987_500_240_385_4).abs() < EPS);
        let rescored = resistance(&graph, &detection.membership).unwrap();
        assert!((rescored - detection.resistance).abs() < EPS);
    }

    #[test]
    fn bridged_triangles_partition() {
        let graph = bridged_triangles();
        let detection = resistance_communities(&graph).unwrap();
        assert_valid(&detection, 6);
        assert_eq!(detection.communities(), vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
        assert!((detection.resistance - 0.691_014_609_350_236_5).abs() < EPS);

        let triangles = resistance(&graph, &[0, 0, 0, 1, 1, 1]).unwrap();
        assert!((triangles - 6.0 / 7.0).abs() < EPS);
    }

    #[test]
    fn bridged_cliques_partition() {
        let graph = WeightedGraph::from_edges(
            8,
            &[
                (0, 1),
                (0, 2),
                (0, 3),
                (1, 2),
                (1, 3),
                (2, 3),
                (4, 5),
                (4, 6),
                (4, 7),
                (5, 6),
                (5, 7),
                (6, 7),
                (3, 4),
            ],
        )
        .unwrap();
        let detection = resistance_communities(&graph).unwrap();
        assert_valid(&detection, 8);
        assert_eq!(
            detection.communities(),
            vec![vec![0, 1, 2], vec![3, 4], vec![5, 6, 7]]
        );
        assert!((detection.resistance - 0.837_194_462_948_751_8).abs() < EPS);
    }

    #[test]
    fn path_and_isolated_nodes() {
        let path = WeightedGraph::from_edges(4, &[(0, 1), (1, 2), (2, 3)]).unwrap();
        let detection = resistance_communities(&path).unwrap();
        assert_eq!(detection.membership, vec![0, 0, 1, 1]);
        assert!((detection.resistance - 2.0 / 3.0).abs() < EPS);

        let sparse = WeightedGraph::from_edges(5, &[(0, 1), (2, 3)]).unwrap();
        let detection = resistance_communities(&sparse).unwrap();
        assert_valid(&detection, 5);
        assert_eq!(detection.membership, vec![0, 0, 1, 1, 2]);
        assert!((detection.resistance - 1.0).abs() < EPS);
    }

    #[test]
    fn self_loops_enter_both_aggregates() {
        // two collapsed triangles joined by their bridge
        let graph = WeightedGraph::new(2, [(0, 0, 3), (1, 1, 3), (0, 1, 1)]).unwrap();
        let detection = resistance_communities(&graph).unwrap();
        assert_eq!(detection.membership, vec![0, 1]);
        assert!((detection.resistance - 6.0 / 7.0).abs() < EPS);
        assert!((resistance(&graph, &[0, 1]).unwrap() - 6.0 / 7.0).abs() < EPS);
    }

    #[test]
    fn history_never_decreases() {
        let graph = bridged_triangles();
        let detection = resistance_communities(&graph).unwrap();
        assert!(detection.passes() >= 1);
        assert!(detection.history.windows(2).all(|w| w[1] >= w[0] - EPS));
        assert_eq!(detection.history.last().copied(), Some(detection.resistance));
    }

    #[test]
    fn pass_cap_is_honoured() {
        let graph = bridged_triangles();
        let optimizer = ResistanceOptimizer::new(ResistanceConfig {
            max_passes: Some(1),
            max_sweeps: None,
        });
        let detection = optimizer.run(&graph).unwrap();
        assert_eq!(detection.passes(), 1);
        assert_valid(&detection, 6);
    }

    #[test]
    fn edgeless_graph_is_rejected() {
        let graph = WeightedGraph::from_edges(3, &[]).unwrap();
        assert!(matches!(
            resistance_communities(&graph),
            Err(ResistanceError::InvalidInput(_))
        ));
        assert!(resistance(&graph, &[0, 1, 2]).is_err());
    }

    #[test]
    fn modularity_of_bridged_triangles() {
        let graph = bridged_triangles();
        let q = modularity(&graph, &[0, 0, 0, 1, 1, 1]).unwrap();
        assert!((q - 5.0 / 14.0).abs() < EPS);
        assert!(modularity(&graph, &[0, 0]).is_err());
    }

    #[test]
    fn config_from_json() {
        let config: ResistanceConfig = serde_json::from_str(r#"{"max_passes": 3}"#).unwrap();
        assert_eq!(config.max_passes, Some(3));
        assert_eq!(config.max_sweeps, None);
        let config: ResistanceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ResistanceConfig::default());
    }
}
