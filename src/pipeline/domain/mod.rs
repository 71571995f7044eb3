//! Domain model for pipeline run task trees.
//!
//! A run owns a forest of task nodes (in practice a single root). The domain
//! holds the node state machine, partial-update semantics, and the ordering
//! and blocking rules that decide which node runs next. Persistence and
//! execution stay outside this boundary.

mod error;
mod ids;
mod node;
mod status;
mod tree;
mod update;

pub use error::{ParseTaskStatusError, TaskTreeDomainError};
pub use ids::{NodeId, RunId, SiblingOrder};
pub use node::{NewPipelineRunTask, PersistedNodeData, PipelineRunTask};
pub use status::TaskStatus;
pub use tree::{BlockingTask, OrderedTask, RunTaskTree};
pub use update::{FieldUpdate, NodeUpdate};
