//! Identifier and validated scalar types for the task tree.

use super::TaskTreeDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! integer_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw persisted identifier.
            #[must_use]
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                value.trim().parse::<i64>().map(Self)
            }
        }
    };
}

integer_id!(
    /// Identifier of a pipeline run; the grouping key for its task tree.
    RunId
);

integer_id!(
    /// Identifier of a task node within a run's tree.
    NodeId
);

/// One-based position of a node among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiblingOrder(u32);

impl SiblingOrder {
    /// Order of the first child under a parent.
    pub const FIRST: Self = Self(1);

    /// Creates a validated sibling order.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeDomainError::InvalidSiblingOrder`] for zero.
    pub const fn new(value: u32) -> Result<Self, TaskTreeDomainError> {
        if value == 0 {
            return Err(TaskTreeDomainError::InvalidSiblingOrder(value));
        }
        Ok(Self(value))
    }

    /// Returns the order that follows this one.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeDomainError::InvalidSiblingOrder`] on overflow.
    pub const fn next(self) -> Result<Self, TaskTreeDomainError> {
        match self.0.checked_add(1) {
            Some(value) => Ok(Self(value)),
            None => Err(TaskTreeDomainError::InvalidSiblingOrder(self.0)),
        }
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SiblingOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
