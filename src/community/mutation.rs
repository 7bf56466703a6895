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

//! Edge insertion strategies driven by the simulation loop.
//!
//! [`EdgeMutationStrategy`] owns the [`GraphState`] and the
//! [`SecurityIndexTracker`] of one run and is the only code path that adds
//! or removes edges, so the two never drift apart.

use foldhash::{HashSet, HashSetExt};
use indexmap::IndexSet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use super::common::{build_rng, CommunityRng};
use super::security::{security_index_volume_entropy, SecurityIndexTracker};
use crate::error::{ResistanceError, Result};
use crate::graph::{normalize_edge, Edge, EdgeTrial, GraphState};

/// How new edges are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Two distinct nodes drawn uniformly until the pair is not yet linked.
    Random,
    /// The cross-community edge between low-degree nodes that minimizes the
    /// volume-entropy security index.
    MinSecurityRatio,
}

impl SelectionMode {
    /// Integer code used by experiment configurations.
    pub fn code(self) -> u32 {
        match self {
            SelectionMode::Random => 0,
            SelectionMode::MinSecurityRatio => 13,
        }
    }
}

impl TryFrom<u32> for SelectionMode {
    type Error = ResistanceError;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            0 => Ok(SelectionMode::Random),
            13 => Ok(SelectionMode::MinSecurityRatio),
            other => Err(ResistanceError::UnknownMode(other)),
        }
    }
}

/// Settings of an [`EdgeMutationStrategy`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Seed of the RNG used by [`SelectionMode::Random`]. `None` seeds from
    /// the operating system.
    pub seed: Option<u64>,
}

/// Adds edges to a graph and keeps its security index in sync.
///
/// Not re-entrant: heuristic selection speculatively inserts candidate
/// edges into the live graph.
#[derive(Debug)]
pub struct EdgeMutationStrategy {
    state: GraphState,
    tracker: SecurityIndexTracker,
    rng: CommunityRng,
}

impl EdgeMutationStrategy {
    pub fn new(state: GraphState, config: MutationConfig) -> Result<Self> {
        let tracker = SecurityIndexTracker::initialize(&state, state.membership())?;
        Ok(EdgeMutationStrategy {
            state,
            tracker,
            rng: build_rng(config.seed),
        })
    }

    pub fn graph(&self) -> &GraphState {
        &self.state
    }

    pub fn tracker(&self) -> &SecurityIndexTracker {
        &self.tracker
    }

    pub fn into_parts(self) -> (GraphState, SecurityIndexTracker) {
        (self.state, self.tracker)
    }

    /// Add `count` new edges and return them in insertion order.
    ///
    /// With non-empty `presupplied` edges the first `count` of them are
    /// applied verbatim and `mode` is ignored; an empty slice selects by
    /// `mode`. If any edge of the batch fails, the edges already applied by
    /// this call are rolled back before the error is returned.
    pub fn add_edges(
        &mut self,
        count: usize,
        mode: SelectionMode,
        presupplied: Option<&[Edge]>,
    ) -> Result<Vec<Edge>> {
        self.check_capacity(count)?;
        let presupplied = presupplied.filter(|edges| !edges.is_empty());
        if let Some(edges) = presupplied {
            if edges.len() < count {
                return Err(ResistanceError::invalid(format!(
                    "{count} edges requested but only {} supplied",
                    edges.len()
                )));
            }
        }

        let mut added = Vec::with_capacity(count);
        let mut seen = HashSet::with_capacity(count);
        for i in 0..count {
            let outcome = match presupplied {
                Some(edges) => Ok(edges[i]),
                None => self.select(mode),
            }
            .and_then(|edge| {
                if !seen.insert(normalize_edge(edge)) {
                    debug_assert!(presupplied.is_some(), "selection repeated {edge:?}");
                    return Err(ResistanceError::InvariantViolation(format!(
                        "edge {edge:?} appears twice in one batch"
                    )));
                }
                self.apply(edge).map(|()| edge)
            });
            match outcome {
                Ok(edge) => added.push(edge),
                Err(err) => {
                    self.rollback(&added)?;
                    return Err(err);
                }
            }
        }
        Ok(added)
    }

    /// Remove a batch returned by [`add_edges`](Self::add_edges), newest
    /// edge first, restoring graph and tracker to their state before it.
    ///
    /// The whole batch is validated first: on error nothing is removed.
    pub fn rollback(&mut self, edges: &[Edge]) -> Result<()> {
        self.check_rollback(edges)?;
        for &edge in edges.iter().rev() {
            self.tracker.commit(edge, false)?;
            if let Err(err) = self.state.remove_edge(edge) {
                self.tracker.commit(edge, true)?;
                return Err(err);
            }
        }
        debug!(edges = edges.len(), "rolled back edge batch");
        Ok(())
    }

    /// Switch to a new partition: rebuild the degree ordering of the graph
    /// and recompute the tracker's aggregates.
    pub fn update_parts(&mut self, membership: Vec<usize>) -> Result<()> {
        self.state.update_membership(membership)?;
        self.tracker.rebind(&self.state, self.state.membership())?;
        debug!(communities = self.state.community_count(), "rebound partition");
        Ok(())
    }

    fn apply(&mut self, edge: Edge) -> Result<()> {
        self.state.add_edge(edge)?;
        if let Err(err) = self.tracker.commit(edge, true) {
            self.state.remove_edge(edge)?;
            return Err(err);
        }
        Ok(())
    }

    /// Every edge present and listed once, and at least one edge left
    /// afterwards so the security index stays defined.
    fn check_rollback(&self, edges: &[Edge]) -> Result<()> {
        if edges.len() >= self.state.edge_count() {
            return Err(ResistanceError::invalid(format!(
                "rolling back {} edges would leave the graph without edges",
                edges.len()
            )));
        }
        let mut seen = HashSet::with_capacity(edges.len());
        for &edge in edges {
            if !self.state.has_edge(edge) {
                return Err(ResistanceError::invalid(format!(
                    "edge {edge:?} is not present"
                )));
            }
            if !seen.insert(normalize_edge(edge)) {
                return Err(ResistanceError::invalid(format!(
                    "edge {edge:?} appears twice in the rollback batch"
                )));
            }
        }
        Ok(())
    }

    fn check_capacity(&self, count: usize) -> Result<()> {
        let n = self.state.node_count();
        let free = n * n.saturating_sub(1) / 2 - self.state.edge_count();
        if count > free {
            return Err(ResistanceError::invalid(format!(
                "{count} new edges requested but only {free} node pairs are unlinked"
            )));
        }
        Ok(())
    }

    fn select(&mut self, mode: SelectionMode) -> Result<Edge> {
        match mode {
            SelectionMode::Random => Ok(self.random_edge()),
            SelectionMode::MinSecurityRatio => self.min_security_ratio_edge(),
        }
    }

    /// Callers guarantee at least one unlinked pair exists.
    fn random_edge(&mut self) -> Edge {
        let n = self.state.node_count();
        loop {
            let src = self.rng.random_range(0..n);
            let tar = self.rng.random_range(0..n);
            if src != tar && !self.state.has_edge((src, tar)) {
                return (src, tar);
            }
        }
    }

    /// Candidate edges between low-degree members of every ordered pair of
    /// distinct communities.
    ///
    /// For a pair, `u` is the lowest-degree member of the community whose
    /// minimum degree is smaller and `v` the lowest-degree member of the
    /// other community not yet linked to `u`. Their degree sum is the bound:
    /// lower-degree members `i` of `v`'s community are paired with the first
    /// member of `u`'s community they are not linked to, and kept only when
    /// the pair beats the bound.
    fn candidate_edges(&self) -> IndexSet<Edge> {
        let parts = self.state.sorted_parts_degree();
        let mut available = IndexSet::new();

        for (si, source) in parts.iter().enumerate() {
            if source.is_empty() {
                continue;
            }
            for (ti, target) in parts.iter().enumerate() {
                if si == ti || target.is_empty() {
                    continue;
                }

                let (mut s_order, mut t_order) = (source.as_slice(), target.as_slice());
                if s_order[0].1 > t_order[0].1 {
                    std::mem::swap(&mut s_order, &mut t_order);
                }
                let first_free = |node: usize, order: &[(usize, u64)]| {
                    order
                        .iter()
                        .copied()
                        .find(|&(other, _)| !self.state.has_edge((node, other)))
                };

                let (u, du) = s_order[0];
                let (u, du, v, dv) = match first_free(u, t_order) {
                    Some((v, dv)) => (u, du, v, dv),
                    None => {
                        std::mem::swap(&mut s_order, &mut t_order);
                        let (u, du) = s_order[0];
                        match first_free(u, t_order) {
                            Some((v, dv)) => (u, du, v, dv),
                            None => continue,
                        }
                    }
                };

                let upper_bound = du + dv;
                available.insert(normalize_edge((u, v)));

                let mut pair: SmallVec<[Edge; 8]> = SmallVec::new();
                for &(i, di) in t_order {
                    if di >= dv {
                        break;
                    }
                    if let Some((j, dj)) = first_free(i, s_order) {
                        if di + dj < upper_bound {
                            pair.push(normalize_edge((i, j)));
                        }
                    }
                }
                available.extend(pair);
            }
        }
        available
    }

    /// Pick the candidate whose insertion yields the smallest volume-entropy
    /// security index. Each candidate is measured inside an [`EdgeTrial`].
    fn min_security_ratio_edge(&mut self) -> Result<Edge> {
        let candidates = self.candidate_edges();
        if candidates.is_empty() {
            return Err(ResistanceError::ExhaustedCandidates);
        }

        let mut best: Option<(f64, Edge)> = None;
        for &edge in &candidates {
            let trial = EdgeTrial::begin(&mut self.state, edge)?;
            let index = security_index_volume_entropy(&*trial, trial.membership())?;
            drop(trial);
            if best.map_or(true, |(min, _)| index < min) {
                best = Some((index, edge));
            }
        }

        let (index, edge) = best.ok_or(ResistanceError::ExhaustedCandidates)?;
        let (u, v) = edge;
        debug_assert_ne!(self.state.community_of(u), self.state.community_of(v));
        if self.state.community_of(u) == self.state.community_of(v) {
            return Err(ResistanceError::InvariantViolation(format!(
                "selected edge {edge:?} lies inside community {}",
                self.state.community_of(u)
            )));
        }
        debug!(
            candidates = candidates.len(),
            edge = ?edge,
            index,
            "selected minimum security ratio edge"
        );
        Ok(edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::security::security_index;

    fn bowtie() -> GraphState {
        let edges = [(0, 1), (0, 2), (1, 2), (3, 4), (3, 5), (4, 5), (2, 3)];
        GraphState::new(6, &edges, vec![0, 0, 0, 1, 1, 1]).unwrap()
    }

    fn strategy(seed: u64) -> EdgeMutationStrategy {
        EdgeMutationStrategy::new(bowtie(), MutationConfig { seed: Some(seed) }).unwrap()
    }

    #[test]
    fn mode_codes() {
        assert_eq!(SelectionMode::try_from(0).unwrap(), SelectionMode::Random);
        assert_eq!(SelectionMode::try_from(13).unwrap(), SelectionMode::MinSecurityRatio);
        assert_eq!(SelectionMode::try_from(7), Err(ResistanceError::UnknownMode(7)));
        assert_eq!(SelectionMode::MinSecurityRatio.code(), 13);
    }

    #[test]
    fn random_edges_are_new_and_distinct() {
        let mut strategy = strategy(42);
        let edges = strategy.add_edges(5, SelectionMode::Random, None).unwrap();
        assert_eq!(edges.len(), 5);
        let mut unique: Vec<Edge> = edges.iter().copied().map(normalize_edge).collect();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        assert!(edges.iter().all(|&(u, v)| u != v));
        assert!(edges.iter().all(|&edge| strategy.graph().has_edge(edge)));
        assert_eq!(strategy.graph().edge_count(), 12);
        assert_eq!(strategy.tracker().edge_count(), 12);
    }

    #[test]
    fn seeded_random_selection_is_reproducible() {
        let a = strategy(9).add_edges(4, SelectionMode::Random, None).unwrap();
        let b = strategy(9).add_edges(4, SelectionMode::Random, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn heuristic_picks_cross_community_low_degree_edge() {
        let mut strategy = strategy(1);
        let edges = strategy
            .add_edges(1, SelectionMode::MinSecurityRatio, None)
            .unwrap();
        assert_eq!(edges, vec![(0, 4)]);
        let (u, v) = edges[0];
        assert_ne!(strategy.graph().community_of(u), strategy.graph().community_of(v));
        assert_eq!(strategy.graph().edge_count(), 8);
    }

    #[test]
    fn heuristic_candidates_stay_across_communities() {
        let strategy = strategy(1);
        let candidates = strategy.candidate_edges();
        assert!(!candidates.is_empty());
        for &(u, v) in &candidates {
            assert_ne!(strategy.graph().community_of(u), strategy.graph().community_of(v));
            assert!(!strategy.graph().has_edge((u, v)));
        }
    }

    #[test]
    fn heuristic_without_candidates_fails() {
        let state = GraphState::new(3, &[(0, 1)], vec![0, 0, 0]).unwrap();
        let mut strategy = EdgeMutationStrategy::new(state, MutationConfig::default()).unwrap();
        assert_eq!(
            strategy.add_edges(1, SelectionMode::MinSecurityRatio, None),
            Err(ResistanceError::ExhaustedCandidates)
        );
        assert_eq!(strategy.graph().edge_count(), 1);
    }

    #[test]
    fn rollback_restores_graph_and_tracker() {
        let mut strategy = strategy(3);
        let before_tracker = strategy.tracker().clone();
        let before_parts = strategy.graph().sorted_parts_degree().to_vec();

        let mut batch = strategy
            .add_edges(2, SelectionMode::MinSecurityRatio, None)
            .unwrap();
        batch.extend(strategy.add_edges(3, SelectionMode::Random, None).unwrap());
        strategy.rollback(&batch).unwrap();

        assert_eq!(strategy.graph().edge_count(), 7);
        assert!(batch.iter().all(|&edge| !strategy.graph().has_edge(edge)));
        assert_eq!(strategy.graph().sorted_parts_degree(), before_parts.as_slice());
        assert_eq!(strategy.tracker().parts_degree(), before_tracker.parts_degree());
        assert_eq!(strategy.tracker().parts_volume(), before_tracker.parts_volume());
        assert_eq!(
            strategy.tracker().degree_distribute(),
            before_tracker.degree_distribute()
        );
        assert_eq!(strategy.tracker().value(), before_tracker.value());
    }

    #[test]
    fn invalid_rollback_leaves_graph_and_tracker_in_sync() {
        let state = GraphState::new(4, &[(0, 1)], vec![0, 0, 1, 1]).unwrap();
        let mut single = EdgeMutationStrategy::new(state, MutationConfig::default()).unwrap();
        assert!(matches!(
            single.rollback(&[(0, 1)]),
            Err(ResistanceError::InvalidInput(_))
        ));
        assert!(single.graph().has_edge((0, 1)));
        assert_eq!(single.graph().edge_count(), 1);
        assert_eq!(single.tracker().edge_count(), 1);
        assert_eq!(single.tracker().degree_distribute(), &[1, 1, 0, 0]);

        let mut strategy = strategy(7);
        let batch = strategy.add_edges(2, SelectionMode::Random, None).unwrap();
        let before_tracker = strategy.tracker().clone();
        for bad in [
            vec![(1, 1), batch[0], batch[1]],
            vec![batch[0], batch[1], (0, 9)],
            vec![batch[0], batch[1], (batch[0].1, batch[0].0)],
        ] {
            assert!(matches!(
                strategy.rollback(&bad),
                Err(ResistanceError::InvalidInput(_))
            ));
            assert_eq!(strategy.graph().edge_count(), 9);
            assert_eq!(strategy.tracker().edge_count(), 9);
            assert!(batch.iter().all(|&edge| strategy.graph().has_edge(edge)));
            assert_eq!(
                strategy.tracker().degree_distribute(),
                before_tracker.degree_distribute()
            );
            assert_eq!(strategy.tracker().parts_volume(), before_tracker.parts_volume());
        }

        strategy.rollback(&batch).unwrap();
        assert_eq!(strategy.graph().edge_count(), 7);
        assert_eq!(strategy.tracker().edge_count(), 7);
    }

    #[test]
    fn empty_presupplied_slice_selects_by_mode() {
        let mut strategy = strategy(5);
        let edges = strategy
            .add_edges(1, SelectionMode::MinSecurityRatio, Some(&[] as &[Edge]))
            .unwrap();
        assert_eq!(edges, vec![(0, 4)]);
        assert_eq!(strategy.graph().edge_count(), 8);
        assert_eq!(strategy.tracker().edge_count(), 8);
    }

    #[test]
    fn presupplied_edges_bypass_selection() {
        let mut strategy = strategy(5);
        let replay = [(1, 4), (0, 5), (2, 5)];
        let edges = strategy
            .add_edges(2, SelectionMode::MinSecurityRatio, Some(&replay))
            .unwrap();
        assert_eq!(edges, vec![(1, 4), (0, 5)]);
        assert!(!strategy.graph().has_edge((2, 5)));
    }

    #[test]
    fn failing_batch_is_undone() {
        let mut strategy = strategy(5);
        let replay = [(1, 4), (4, 1)];
        let err = strategy
            .add_edges(2, SelectionMode::Random, Some(&replay))
            .unwrap_err();
        assert!(matches!(err, ResistanceError::InvariantViolation(_)));
        assert!(!strategy.graph().has_edge((1, 4)));
        assert_eq!(strategy.tracker().edge_count(), 7);

        assert!(strategy
            .add_edges(1, SelectionMode::Random, Some(&[(0, 1)]))
            .is_err());
        assert!(strategy
            .add_edges(3, SelectionMode::Random, Some(&[(0, 3)]))
            .is_err());
        assert_eq!(strategy.graph().edge_count(), 7);
    }

    #[test]
    fn capacity_is_checked() {
        let mut strategy = strategy(5);
        // 15 pairs, 7 linked
        assert!(strategy.add_edges(9, SelectionMode::Random, None).is_err());
        let edges = strategy.add_edges(8, SelectionMode::Random, None).unwrap();
        assert_eq!(edges.len(), 8);
        assert_eq!(strategy.graph().edge_count(), 15);
    }

    #[test]
    fn update_parts_rebinds_tracker() {
        let mut strategy = strategy(5);
        strategy.add_edges(2, SelectionMode::Random, None).unwrap();
        strategy.update_parts(vec![0, 0, 1, 1, 2, 2]).unwrap();
        assert_eq!(strategy.graph().community_count(), 3);
        let scratch = security_index(strategy.graph(), strategy.graph().membership()).unwrap();
        assert!((strategy.tracker().value() - scratch).abs() < 1e-12);
        assert!(strategy.update_parts(vec![0, 1]).is_err());
    }
}
