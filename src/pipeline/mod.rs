//! Pipeline run task trees.
//!
//! This module follows a hexagonal layout:
//!
//! - `domain`: nodes, the status state machine, and ordering rules
//! - `ports`: the transactional store contract
//! - `adapters`: in-memory and `PostgreSQL` stores with their change feeds
//! - `services`: tree editing, the scheduler, and the watch endpoint

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

use crate::notify::ChannelName;

/// Channel on which stores announce the run id of every committed change.
pub const TASK_TREE_CHANNEL: ChannelName = ChannelName::from_static("pipeline_run_task_changed");

#[cfg(test)]
mod tests;
