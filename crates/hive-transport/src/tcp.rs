use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hive_codec::{read_message, write_message, Message};
use hive_core::NodeAddress;
use tracing::{debug, warn};

use crate::adapter::Transmitter;
use crate::cache::SocketCache;
use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct TcpTransmitterConfig {
    /// Upper bound on attempts when a connection breaks transiently.
    pub max_attempts: u32,
}

impl Default for TcpTransmitterConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpTransmitterStats {
    pub requests: u64,
    pub replies: u64,
    pub retries: u64,
    pub dead_peers: u64,
}

#[derive(Debug, Default)]
struct TcpTransmitterMetrics {
    requests: AtomicU64,
    replies: AtomicU64,
    retries: AtomicU64,
    dead_peers: AtomicU64,
}

/// Request/reply over TCP using cached connections.
///
/// Each call checks a connection out of the [`SocketCache`], writes one frame, reads
/// one reply frame, and returns the connection on success. A failed connection is
/// closed. Dead-peer errors end the call at once; transient ones are retried on a
/// fresh connection up to `max_attempts` times. Only a reused connection closing
/// without a reply is transient.
pub struct TcpTransmitter {
    cache: Arc<SocketCache>,
    config: TcpTransmitterConfig,
    metrics: TcpTransmitterMetrics,
}

impl TcpTransmitter {
    pub fn new(cache: Arc<SocketCache>, config: TcpTransmitterConfig) -> Self {
        Self {
            cache,
            config,
            metrics: TcpTransmitterMetrics::default(),
        }
    }

    pub fn cache(&self) -> &Arc<SocketCache> {
        &self.cache
    }

    pub fn stats(&self) -> TcpTransmitterStats {
        TcpTransmitterStats {
            requests: self.metrics.requests.load(Ordering::Relaxed),
            replies: self.metrics.replies.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
            dead_peers: self.metrics.dead_peers.load(Ordering::Relaxed),
        }
    }

    fn dead(&self, address: &NodeAddress, err: TransportError) -> TransportError {
        self.metrics.dead_peers.fetch_add(1, Ordering::Relaxed);
        debug!(%address, error = %err, "peer is unreachable");
        err
    }
}

impl Transmitter for TcpTransmitter {
    fn transmit(
        &self,
        address: &NodeAddress,
        message: &Message,
    ) -> Result<Message, TransportError> {
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);
        let attempts = self.config.max_attempts.max(1);
        let mut last = TransportError::Closed;

        for attempt in 1..=attempts {
            let (mut stream, reused) = self
                .cache
                .checkout(address)
                .map_err(|err| self.dead(address, err))?;

            match exchange(&mut stream, message) {
                Ok(reply) => {
                    self.metrics.replies.fetch_add(1, Ordering::Relaxed);
                    self.cache.add_and_evict_old(address, stream);
                    return Ok(reply);
                }
                // A fresh connection closed after the whole request was written means
                // the peer read it and chose not to answer.
                Err(TransportError::Closed) if !reused => {
                    let _ = stream.shutdown(Shutdown::Both);
                    return Err(self.dead(address, TransportError::NoReply(address.to_string())));
                }
                Err(err) => {
                    let _ = stream.shutdown(Shutdown::Both);
                    if err.is_dead() {
                        return Err(self.dead(address, err));
                    }
                    warn!(%address, attempt, error = %err, "transmit failed, retrying on a fresh connection");
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    last = err;
                }
            }
        }

        Err(self.dead(
            address,
            TransportError::Exhausted {
                attempts,
                last: Box::new(last),
            },
        ))
    }
}

fn exchange(stream: &mut TcpStream, message: &Message) -> Result<Message, TransportError> {
    write_message(stream, message)?;
    read_message(stream)?.ok_or(TransportError::Closed)
}
