//! HIVE overlay node.
//!
//! Routing engine, back-pointer table, neighbour map, object store, and the
//! services a node answers locally.

pub mod builtin;
pub mod config;
pub mod error;
pub mod locks;
pub mod node;
pub mod objects;
pub mod publishers;
pub mod routing;
pub mod service;
pub mod store;
pub mod sweeper;

pub use config::NodeConfig;
pub use error::NodeError;
pub use locks::{KeyGuard, KeyLocks, LockError};
pub use node::{Node, NodeBuilder, NodeStats};
pub use objects::{MemoryObjectStore, ObjectStore, ObjectStoreError};
pub use publishers::{ExpireStats, Publishers, PublishersError};
pub use routing::{NeighbourMap, Router, DEFAULT_SLOT_DEPTH};
pub use service::{Service, ServiceContext, ServiceError, ServiceRegistry};
pub use store::{FilePublisherStore, MemoryPublisherStore, PublisherStore, StoreError};
pub use sweeper::PublisherSweeper;
