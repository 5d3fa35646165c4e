//! # Error Classification
//!
//! Each module has its own error enum. This module gives them a common
//! vocabulary so callers can tell a business refusal ("not enough points")
//! apart from a real fault ("the disk is gone") without matching on every
//! variant of every error type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input: bad movement sign, non-positive amount, invalid rule.
    /// Rejected before any mutation.
    Validation,
    /// Balance or stock too low. A normal business outcome.
    InsufficientResource,
    /// The operation is illegal in the entity's current state.
    StateConflict,
    /// A referenced entity does not exist.
    NotFound,
    /// Storage or serialization failure.
    System,
}

impl ErrorKind {
    /// `true` for outcomes a caller should present as a business message
    /// rather than an outage.
    pub fn is_refusal(&self) -> bool {
        !matches!(self, ErrorKind::System)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::InsufficientResource => write!(f, "insufficient_resource"),
            ErrorKind::StateConflict => write!(f, "state_conflict"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::System => write!(f, "system"),
        }
    }
}

/// Implemented by every public error type in the workspace.
pub trait Classify {
    /// The category this error falls into.
    fn kind(&self) -> ErrorKind;

    /// Shorthand for `self.kind().is_refusal()`.
    fn is_refusal(&self) -> bool {
        self.kind().is_refusal()
    }
}
