//! Conductor: task-tree orchestration for pipeline runs.
//!
//! Each pipeline run owns a tree of task nodes. A scheduler walks the tree
//! in pre-order and executes one node at a time: system tasks run a
//! registered executable that may graft more nodes onto the tree, user
//! tasks record a human acknowledgement. Failed nodes block the run until
//! they are reworked. Clients watch a run through a notification channel
//! group that pushes a fresh ordered snapshot after every committed change.
//!
//! # Architecture
//!
//! The crate follows hexagonal architecture principles:
//!
//! - **Domain**: Pure tree rules with no infrastructure dependencies
//! - **Ports**: Trait interfaces for storage and change feeds
//! - **Adapters**: In-memory and `PostgreSQL` implementations of the ports
//!
//! # Modules
//!
//! - [`registry`]: Task definitions and their executables
//! - [`pipeline`]: Run task trees, the scheduler, and the watch endpoint
//! - [`notify`]: Generic notification channel groups
//! - [`catalog`]: The file-collection workflow registered at start-up
//! - [`config`]: Process configuration

pub mod catalog;
pub mod config;
pub mod notify;
pub mod pipeline;
pub mod registry;
