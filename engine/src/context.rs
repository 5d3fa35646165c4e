//! Per-operation context: who asked (correlation id) and when.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Carried into every mutating operation.
///
/// The correlation id is supplied by the caller (HTTP request id, message
/// id, batch run id) and travels with every domain event the operation
/// emits. `at` is the operation's logical timestamp; movements and state
/// transitions are stamped with it, which keeps tests deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpContext {
    pub correlation_id: Uuid,
    pub at: DateTime<Utc>,
}

impl OpContext {
    /// Fresh random correlation id, stamped with the current time.
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            at: Utc::now(),
        }
    }

    /// Context with an explicit timestamp and a fresh correlation id.
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            at,
        }
    }

    /// Replaces the correlation id.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}
