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

mod common;
pub mod mutation;
pub mod resistance;
pub mod security;

pub use mutation::{EdgeMutationStrategy, MutationConfig, SelectionMode};
pub use resistance::{
    modularity, resistance, resistance_communities, Detection, ResistanceConfig,
    ResistanceOptimizer,
};
pub use security::{
    position_entropy, security_index, security_index_boundary_penalized,
    security_index_boundary_weighted, security_index_volume_entropy, SecurityIndexTracker,
};
