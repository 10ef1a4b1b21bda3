//! Pool error taxonomy

use crate::connector::ConnectError;
use std::time::Duration;

/// Errors returned by pool acquisition and release.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Acquisition timed out with every handle on loan. Recoverable; the
    /// caller retries or surfaces the condition to its own caller.
    #[error("pool `{name}` exhausted: no resource released within {waited:?}")]
    Exhausted {
        /// Pool name
        name: String,
        /// How long the acquirer waited
        waited: Duration,
    },

    /// The backend factory failed to produce a resource. Recoverable
    /// per-attempt; the failed create does not count against the pool.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The handle is not currently on loan from this pool. Rejects double
    /// release and release of foreign handles.
    #[error("resource {id} is not on loan from pool `{name}`")]
    NotLoaned {
        /// Pool name
        name: String,
        /// Handle id
        id: u64,
    },
}
