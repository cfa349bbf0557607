use std::time::Duration;

use serde::Deserialize;

/// Construction parameters for a [`Broadcaster`](crate::Broadcaster).
///
/// Deserializes from e.g. `{"buffer_size": 8, "timeout_ms": 1000}`. Both
/// fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BroadcasterConfig {
    /// Capacity of the producer-facing value queue.
    #[serde(default)]
    pub buffer_size: usize,
    /// Per-round delivery timeout. Absent means a round waits for every live
    /// subscriber.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl BroadcasterConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// tokio channels need room for at least one value.
    pub fn queue_capacity(&self) -> usize {
        self.buffer_size.max(1)
    }
}
