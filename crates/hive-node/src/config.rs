use std::time::Duration;

use hive_core::N_DIGITS;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Hop bound; a message reaching it is dropped as a routing loop.
    pub max_hops: i16,
    /// Lifetime given to back-pointers created by this node's publishes.
    pub publish_ttl_seconds: i64,
    /// Period of the publisher expiry sweep.
    pub sweep_interval: Duration,
    /// Byte bound for the default object store; `None` is unbounded.
    pub object_store_capacity: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            max_hops: N_DIGITS as i16,
            publish_ttl_seconds: 3_600,
            sweep_interval: Duration::from_secs(60),
            object_store_capacity: None,
        }
    }
}
