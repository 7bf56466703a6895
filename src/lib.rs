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

//! Community detection by resistance optimization, and incremental
//! maintenance of the entropy-based security index under single-edge
//! mutations.
//!
//! * [`ResistanceOptimizer`] partitions a [`WeightedGraph`] (or any
//!   [`GraphView`]) with a two-phase local moving / aggregation loop.
//! * [`SecurityIndexTracker`] keeps per-community aggregates of a fixed
//!   partition up to date while edges are added or removed.
//! * [`EdgeMutationStrategy`] chooses new edges, applies them through
//!   [`GraphState`] and keeps the tracker in sync, with exact rollback.
//!
//! The library performs no I/O and never installs a `tracing` subscriber.

pub mod community;
pub mod error;
pub mod graph;
#[cfg(feature = "python")]
mod python;

pub use community::{
    Detection, EdgeMutationStrategy, MutationConfig, ResistanceConfig, ResistanceOptimizer,
    SecurityIndexTracker, SelectionMode,
};
pub use error::{ResistanceError, Result};
pub use graph::{normalize_edge, Edge, EdgeTrial, GraphState, GraphView, WeightedGraph};
