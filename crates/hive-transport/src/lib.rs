//! HIVE point-to-point transport.
//!
//! Provides the seams the routing engine talks through (`Transmitter`,
//! `MessageHandler`), a TCP client with an LRU socket cache, a thread-per-connection
//! TCP server, and an in-memory network for simulations and tests.

pub mod adapter;
pub mod cache;
pub mod error;
pub mod memory;
pub mod server;
pub mod tcp;

pub use adapter::{MessageHandler, Transmitter};
pub use cache::{SocketCache, SocketCacheConfig, SocketCacheStats};
pub use error::TransportError;
pub use memory::InMemoryNetwork;
pub use server::{Server, ServerConfig, ServerStats};
pub use tcp::{TcpTransmitter, TcpTransmitterConfig, TcpTransmitterStats};
