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

//! Graph representations shared by the optimizer, the security index
//! tracker and the edge mutation strategy.
//!
//! Two concrete graphs implement [`GraphView`]:
//!
//! * [`WeightedGraph`]: an immutable, weighted snapshot handed to the
//!   resistance optimizer. Self-loops are allowed and parallel edges are
//!   summed.
//! * [`GraphState`]: the simple, mutable graph driven by the simulation
//!   loop. It is the only place edges are added or removed, and it keeps the
//!   members of every community ordered by degree.

use std::ops::Deref;

use fixedbitset::FixedBitSet;
use indexmap::IndexMap;
use petgraph::graphmap::UnGraphMap;

use crate::error::{ResistanceError, Result};

/// An undirected edge given by its two endpoint ids.
pub type Edge = (usize, usize);

/// Order the endpoints of an edge so that `u <= v`.
#[inline]
pub fn normalize_edge((u, v): Edge) -> Edge {
    if u <= v {
        (u, v)
    } else {
        (v, u)
    }
}

/// Read-only view over an undirected graph whose nodes are `0..node_count()`.
///
/// The optimizer and the security index only ever talk to a graph through
/// this trait.
pub trait GraphView {
    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Sum of the weights of the edges incident to `node`. A self-loop of
    /// weight `w` contributes `2w`.
    fn degree(&self, node: usize) -> u64;

    /// Distinct neighbors of `node`. A node with a self-loop is its own
    /// neighbor.
    fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_;

    /// Weight of the edge between `u` and `v`, if any.
    fn edge_weight(&self, u: usize, v: usize) -> Option<u64>;

    /// Sum of all edge weights (`m`).
    fn total_weight(&self) -> u64;

    /// Total weight of the edges with both endpoints in `members`.
    ///
    /// `members` must not contain duplicates.
    fn induced_edge_count(&self, members: &[usize]) -> u64 {
        let mut inside = FixedBitSet::with_capacity(self.node_count());
        for &node in members {
            inside.insert(node);
        }
        let mut loops = 0;
        let mut twice = 0;
        for &u in members {
            for v in self.neighbors(u) {
                if !inside.contains(v) {
                    continue;
                }
                let weight = self.edge_weight(u, v).unwrap_or(0);
                if u == v {
                    loops += weight;
                } else {
                    twice += weight;
                }
            }
        }
        loops + twice / 2
    }
}

fn check_node(node: usize, node_count: usize) -> Result<()> {
    if node >= node_count {
        return Err(ResistanceError::invalid(format!(
            "node {node} is outside the contiguous id range [0, {node_count})"
        )));
    }
    Ok(())
}

// ========================
// Weighted snapshot
// ========================

/// Immutable weighted undirected graph.
#[derive(Clone, Debug, Default)]
pub struct WeightedGraph {
    /// node -> neighbor -> summed weight, in first-seen order
    adj: Vec<IndexMap<usize, u64>>,
    degrees: Vec<u64>,
    total_weight: u64,
}

impl WeightedGraph {
    /// Build a graph with `node_count` nodes from `(u, v, weight)` triples.
    ///
    /// Parallel edges are merged by summing their weights. Every weight must
    /// be positive and every endpoint must lie in `[0, node_count)`.
    pub fn new<I>(node_count: usize, edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, usize, u64)>,
    {
        let mut adj = vec![IndexMap::new(); node_count];
        let mut degrees = vec![0; node_count];
        let mut total_weight = 0;

        for (u, v, weight) in edges {
            check_node(u, node_count)?;
            check_node(v, node_count)?;
            if weight == 0 {
                return Err(ResistanceError::invalid(
                    "resistance optimization requires positive edge weights",
                ));
            }
            *adj[u].entry(v).or_insert(0) += weight;
            if u != v {
                *adj[v].entry(u).or_insert(0) += weight;
            }
            degrees[u] += weight;
            degrees[v] += weight;
            total_weight += weight;
        }

        Ok(WeightedGraph {
            adj,
            degrees,
            total_weight,
        })
    }

    /// Build an unweighted graph (every edge has weight 1).
    pub fn from_edges(node_count: usize, edges: &[Edge]) -> Result<Self> {
        Self::new(node_count, edges.iter().map(|&(u, v)| (u, v, 1)))
    }

    /// Snapshot of the current edges of a [`GraphState`].
    pub fn from_state(state: &GraphState) -> Self {
        let mut edges: Vec<Edge> = state.edges().map(normalize_edge).collect();
        edges.sort_unstable();
        // ids and weights were validated when the edges entered the state
        Self::new(state.node_count(), edges.into_iter().map(|(u, v)| (u, v, 1)))
            .unwrap_or_default()
    }

    /// Every edge once, as `(u, v, weight)` with `u <= v`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, u64)> + '_ {
        self.adj.iter().enumerate().flat_map(|(u, row)| {
            row.iter()
                .filter(move |(&v, _)| u <= v)
                .map(move |(&v, &weight)| (u, v, weight))
        })
    }

    /// Number of distinct edges (self-loops included).
    pub fn edge_count(&self) -> usize {
        self.edges().count()
    }
}

impl GraphView for WeightedGraph {
    fn node_count(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, node: usize) -> u64 {
        self.degrees.get(node).copied().unwrap_or(0)
    }

    fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.adj
            .get(node)
            .into_iter()
            .flat_map(|row| row.keys().copied())
    }

    fn edge_weight(&self, u: usize, v: usize) -> Option<u64> {
        self.adj.get(u).and_then(|row| row.get(&v)).copied()
    }

    fn total_weight(&self) -> u64 {
        self.total_weight
    }
}

// ========================
// Mutable simulation graph
// ========================

/// Mutable simple graph plus a fixed membership vector.
///
/// For every community the members are kept sorted by `(degree, node)`.
/// `add_edge`/`remove_edge` only move the two endpoints inside their
/// community list; [`GraphState::update_membership`] rebuilds all lists.
#[derive(Clone, Debug)]
pub struct GraphState {
    graph: UnGraphMap<usize, ()>,
    degrees: Vec<u64>,
    membership: Vec<usize>,
    sorted_parts_degree: Vec<Vec<(usize, u64)>>,
}

impl GraphState {
    /// Create the state for `node_count` nodes, the given simple edge list
    /// and a membership vector assigning a community id to every node.
    pub fn new(node_count: usize, edges: &[Edge], membership: Vec<usize>) -> Result<Self> {
        let mut graph: UnGraphMap<usize, ()> = UnGraphMap::with_capacity(node_count, edges.len());
        for node in 0..node_count {
            graph.add_node(node);
        }
        let mut state = GraphState {
            graph,
            degrees: vec![0; node_count],
            membership: Vec::new(),
            sorted_parts_degree: Vec::new(),
        };
        for &edge in edges {
            state.check_new_edge(edge)?;
            let (u, v) = edge;
            state.graph.add_edge(u, v, ());
            state.degrees[u] += 1;
            state.degrees[v] += 1;
        }
        state.update_membership(membership)?;
        Ok(state)
    }

    pub fn node_count(&self) -> usize {
        self.degrees.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Presence check, independent of the endpoint order.
    pub fn has_edge(&self, (u, v): Edge) -> bool {
        u < self.node_count() && v < self.node_count() && self.graph.contains_edge(u, v)
    }

    pub fn membership(&self) -> &[usize] {
        &self.membership
    }

    pub fn community_of(&self, node: usize) -> usize {
        self.membership[node]
    }

    /// Number of community slots (`max(membership) + 1`), empty ones included.
    pub fn community_count(&self) -> usize {
        self.sorted_parts_degree.len()
    }

    /// Per community, its members as `(node, degree)` in ascending degree
    /// order (ties by node id).
    pub fn sorted_parts_degree(&self) -> &[Vec<(usize, u64)>] {
        &self.sorted_parts_degree
    }

    /// Members of every community slot, in ascending node order.
    pub fn communities(&self) -> Vec<Vec<usize>> {
        let mut parts = vec![Vec::new(); self.community_count()];
        for (node, &part) in self.membership.iter().enumerate() {
            parts[part].push(node);
        }
        parts
    }

    /// Every edge once, in storage order.
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.graph.all_edges().map(|(u, v, _)| (u, v))
    }

    /// Reject self-loops, unknown nodes and edges that already exist.
    pub fn check_new_edge(&self, (u, v): Edge) -> Result<()> {
        check_node(u, self.node_count())?;
        check_node(v, self.node_count())?;
        if u == v {
            return Err(ResistanceError::invalid(format!(
                "self-loop ({u}, {v}) is not allowed"
            )));
        }
        if self.graph.contains_edge(u, v) {
            return Err(ResistanceError::invalid(format!(
                "edge ({u}, {v}) is already present"
            )));
        }
        Ok(())
    }

    /// Insert a new edge and move both endpoints to their new rank.
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        self.check_new_edge(edge)?;
        let (u, v) = edge;
        self.reposition(u, self.degrees[u] + 1);
        self.reposition(v, self.degrees[v] + 1);
        self.graph.add_edge(u, v, ());
        Ok(())
    }

    /// Delete an existing edge and move both endpoints to their new rank.
    pub fn remove_edge(&mut self, edge: Edge) -> Result<()> {
        let (u, v) = edge;
        if !self.has_edge(edge) {
            return Err(ResistanceError::invalid(format!(
                "edge ({u}, {v}) is not present"
            )));
        }
        self.graph.remove_edge(u, v);
        self.reposition(u, self.degrees[u] - 1);
        self.reposition(v, self.degrees[v] - 1);
        Ok(())
    }

    /// Replace the membership vector and rebuild the degree ordering of
    /// every community. This is O(n log n); call it only when the partition
    /// actually changed.
    pub fn update_membership(&mut self, membership: Vec<usize>) -> Result<()> {
        if membership.len() != self.node_count() {
            return Err(ResistanceError::invalid(format!(
                "membership has {} entries for {} nodes",
                membership.len(),
                self.node_count()
            )));
        }
        let parts = membership.iter().copied().max().map_or(0, |max| max + 1);
        let mut sorted_parts_degree = vec![Vec::new(); parts];
        for (node, &part) in membership.iter().enumerate() {
            sorted_parts_degree[part].push((node, self.degrees[node]));
        }
        for part in &mut sorted_parts_degree {
            part.sort_unstable_by_key(|&(node, degree)| (degree, node));
        }
        self.membership = membership;
        self.sorted_parts_degree = sorted_parts_degree;
        Ok(())
    }

    fn reposition(&mut self, node: usize, degree: u64) {
        let old = self.degrees[node];
        let part = &mut self.sorted_parts_degree[self.membership[node]];
        if let Ok(idx) = part.binary_search_by(|&(n, d)| (d, n).cmp(&(old, node))) {
            part.remove(idx);
        }
        let at = part.partition_point(|&(n, d)| (d, n) < (degree, node));
        part.insert(at, (node, degree));
        self.degrees[node] = degree;
    }
}

impl GraphView for GraphState {
    fn node_count(&self) -> usize {
        self.degrees.len()
    }

    fn degree(&self, node: usize) -> u64 {
        self.degrees.get(node).copied().unwrap_or(0)
    }

    fn neighbors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph.neighbors(node)
    }

    fn edge_weight(&self, u: usize, v: usize) -> Option<u64> {
        self.has_edge((u, v)).then_some(1)
    }

    fn total_weight(&self) -> u64 {
        self.graph.edge_count() as u64
    }
}

/// A speculative edge insertion that is undone when the guard drops.
///
/// While the trial is alive the graph can be inspected through `Deref`;
/// every exit path (including early returns and `?`) removes the edge again.
pub struct EdgeTrial<'a> {
    state: &'a mut GraphState,
    edge: Edge,
}

impl<'a> EdgeTrial<'a> {
    pub fn begin(state: &'a mut GraphState, edge: Edge) -> Result<Self> {
        state.add_edge(edge)?;
        Ok(EdgeTrial { state, edge })
    }

    pub fn edge(&self) -> Edge {
        self.edge
    }
}

impl Deref for EdgeTrial<'_> {
    type Target = GraphState;

    fn deref(&self) -> &GraphState {
        self.state
    }
}

impl Drop for EdgeTrial<'_> {
    fn drop(&mut self) {
        let undone = self.state.remove_edge(self.edge);
        debug_assert!(undone.is_ok(), "trial edge vanished before it was undone");
    }
}
