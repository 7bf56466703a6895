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

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ResistanceError>;

/// Errors surfaced by the optimizer, the security index tracker and the
/// edge mutation strategy.
///
/// All failures are local and synchronous; none of them is retried
/// internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResistanceError {
    /// The input cannot be processed: a graph without edges, node ids
    /// outside `[0, n)`, a malformed membership vector, an edge that is
    /// absent or already present, or more edges requested than the graph
    /// can still hold.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// An edge selection mode code outside the defined set.
    #[error("unknown edge selection mode: {0}")]
    UnknownMode(u32),
    /// The heuristic selection found no cross-community candidate edge.
    #[error("no valid cross-community candidate edge could be found")]
    ExhaustedCandidates,
    /// Internal state is corrupted. This never happens under correct use.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ResistanceError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ResistanceError::InvalidInput(message.into())
    }
}
