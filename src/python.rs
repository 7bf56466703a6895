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

//! Python bindings used by the simulation loop (`python` feature).

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::wrap_pyfunction;

use crate::community::{
    EdgeMutationStrategy, MutationConfig, ResistanceConfig, ResistanceOptimizer, SelectionMode,
};
use crate::error::ResistanceError;
use crate::graph::{Edge, GraphState, WeightedGraph};

impl From<ResistanceError> for PyErr {
    fn from(err: ResistanceError) -> PyErr {
        match err {
            ResistanceError::InvalidInput(_) | ResistanceError::UnknownMode(_) => {
                PyValueError::new_err(err.to_string())
            }
            ResistanceError::ExhaustedCandidates | ResistanceError::InvariantViolation(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}

/// Partition a graph by resistance optimization.
///
/// Args:
///     node_count (int): Number of nodes; ids are ``0..node_count``.
///     edges (list[tuple[int, int, int]]): ``(u, v, weight)`` triples.
///     max_passes (int, optional): Cap on the number of passes.
///
/// Returns:
///     tuple[list[list[int]], float]: The communities and the resistance reached.
///
/// Raises:
///     ValueError: If the graph has no edges, an id is out of range or a
///         weight is zero.
#[pyfunction]
#[pyo3(
    signature = (node_count, edges, /, max_passes=None),
    text_signature = "(node_count, edges, /, max_passes=None)"
)]
pub fn resistance_communities(
    node_count: usize,
    edges: Vec<(usize, usize, u64)>,
    max_passes: Option<usize>,
) -> PyResult<(Vec<Vec<usize>>, f64)> {
    let graph = WeightedGraph::new(node_count, edges)?;
    let optimizer = ResistanceOptimizer::new(ResistanceConfig {
        max_passes,
        max_sweeps: None,
    });
    let detection = optimizer.run(&graph)?;
    Ok((detection.communities(), detection.resistance))
}

/// Security index of a simple graph under a membership vector.
#[pyfunction]
#[pyo3(signature = (node_count, edges, membership, /))]
pub fn security_index(
    node_count: usize,
    edges: Vec<Edge>,
    membership: Vec<usize>,
) -> PyResult<f64> {
    let state = GraphState::new(node_count, &edges, membership)?;
    Ok(crate::community::security_index(&state, state.membership())?)
}

/// Edge insertion strategy bound to one graph and partition.
#[pyclass(name = "EdgeStrategy", unsendable)]
pub struct PyEdgeStrategy {
    inner: EdgeMutationStrategy,
}

#[pymethods]
impl PyEdgeStrategy {
    #[new]
    #[pyo3(signature = (node_count, edges, membership, seed=None))]
    fn new(
        node_count: usize,
        edges: Vec<Edge>,
        membership: Vec<usize>,
        seed: Option<u64>,
    ) -> PyResult<Self> {
        let state = GraphState::new(node_count, &edges, membership)?;
        let inner = EdgeMutationStrategy::new(state, MutationConfig { seed })?;
        Ok(PyEdgeStrategy { inner })
    }

    /// Add ``edge_sum`` edges chosen by ``mode`` (0 random, 13 heuristic),
    /// or replay a non-empty ``ini_edges`` list verbatim.
    #[pyo3(signature = (edge_sum, mode, ini_edges=None))]
    fn add_edge(
        &mut self,
        edge_sum: usize,
        mode: u32,
        ini_edges: Option<Vec<Edge>>,
    ) -> PyResult<Vec<Edge>> {
        let mode = SelectionMode::try_from(mode)?;
        Ok(self.inner.add_edges(edge_sum, mode, ini_edges.as_deref())?)
    }

    fn rollback(&mut self, edges: Vec<Edge>) -> PyResult<()> {
        Ok(self.inner.rollback(&edges)?)
    }

    fn update_parts(&mut self, membership: Vec<usize>) -> PyResult<()> {
        Ok(self.inner.update_parts(membership)?)
    }

    fn preview(&self, edge: Edge, is_add: bool) -> PyResult<f64> {
        Ok(self.inner.tracker().preview(edge, is_add)?)
    }

    fn security_index(&self) -> f64 {
        self.inner.tracker().value()
    }

    fn membership(&self) -> Vec<usize> {
        self.inner.graph().membership().to_vec()
    }

    fn edges(&self) -> Vec<Edge> {
        self.inner.graph().edges().collect()
    }
}

#[pymodule]
#[pyo3(name = "resistance")]
pub fn resistance_module(_py: Python, m: &Bound<PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(resistance_communities, m)?)?;
    m.add_function(wrap_pyfunction!(security_index, m)?)?;
    m.add_class::<PyEdgeStrategy>()?;
    Ok(())
}
