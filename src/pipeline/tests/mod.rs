//! Unit tests for run task trees.
