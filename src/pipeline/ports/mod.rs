//! Port contracts for task tree persistence.
//!
//! Ports define infrastructure-agnostic interfaces used by task tree
//! services. Change events emitted on commit are consumed through the
//! [`crate::notify`] ports.

pub mod store;

pub use store::{TaskTreeStore, TaskTreeStoreError, TaskTreeStoreResult, TaskTreeTransaction};
