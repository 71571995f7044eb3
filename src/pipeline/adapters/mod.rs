//! Adapter implementations for task tree ports.

pub mod memory;
pub mod postgres;
