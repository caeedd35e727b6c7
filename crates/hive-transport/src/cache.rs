use std::io::{self, ErrorKind};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use hive_core::NodeAddress;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::TransportError;

#[derive(Debug, Clone)]
pub struct SocketCacheConfig {
    /// Maximum idle connections kept across all peers.
    pub capacity: usize,
    pub connect_timeout: Duration,
    /// Read and write timeout applied to every cached socket.
    pub io_timeout: Duration,
}

impl Default for SocketCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            connect_timeout: Duration::from_secs(8),
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub stale_discards: u64,
    pub connect_failures: u64,
    pub idle: usize,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct SocketCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    stale_discards: AtomicU64,
    connect_failures: AtomicU64,
}

/// Bounded LRU of idle outbound connections, keyed by peer endpoint.
///
/// A connection is checked out with [`SocketCache::get_and_remove`] and handed back
/// with [`SocketCache::add_and_evict_old`]. A checked-out connection belongs to exactly
/// one caller, and a connection that fails the liveness probe is never handed out.
pub struct SocketCache {
    config: SocketCacheConfig,
    idle: Mutex<LruCache<String, TcpStream>>,
    metrics: SocketCacheMetrics,
}

impl SocketCache {
    pub fn new(config: SocketCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            idle: Mutex::new(LruCache::new(capacity)),
            metrics: SocketCacheMetrics::default(),
        }
    }

    /// Returns a live connection to `address`, reusing an idle one when possible.
    pub fn get_and_remove(&self, address: &NodeAddress) -> Result<TcpStream, TransportError> {
        self.checkout(address).map(|(stream, _)| stream)
    }

    /// Like [`SocketCache::get_and_remove`], also reporting whether the connection
    /// came from the idle pool.
    pub fn checkout(&self, address: &NodeAddress) -> Result<(TcpStream, bool), TransportError> {
        let endpoint = address.endpoint();
        let cached = self.idle.lock().pop(&endpoint);
        if let Some(stream) = cached {
            if is_alive(&stream) {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                trace!(%endpoint, "socket cache hit");
                return Ok((stream, true));
            }
            self.metrics.stale_discards.fetch_add(1, Ordering::Relaxed);
            debug!(%endpoint, "discarding stale cached socket");
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        let stream = self.connect(&endpoint).inspect_err(|_| {
            self.metrics.connect_failures.fetch_add(1, Ordering::Relaxed);
        })?;
        Ok((stream, false))
    }

    /// Returns a connection to the idle pool.
    ///
    /// An older idle connection to the same peer, or the least recently used one when
    /// the pool is full, is closed.
    pub fn add_and_evict_old(&self, address: &NodeAddress, stream: TcpStream) {
        if self.config.capacity == 0 {
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
        let evicted = self.idle.lock().push(address.endpoint(), stream);
        if let Some((endpoint, old)) = evicted {
            self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(%endpoint, "socket cache eviction");
            let _ = old.shutdown(Shutdown::Both);
        }
    }

    /// Closes every idle connection.
    pub fn dispose(&self) {
        let mut idle = self.idle.lock();
        while let Some((_, stream)) = idle.pop_lru() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn stats(&self) -> SocketCacheStats {
        SocketCacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            stale_discards: self.metrics.stale_discards.load(Ordering::Relaxed),
            connect_failures: self.metrics.connect_failures.load(Ordering::Relaxed),
            idle: self.idle.lock().len(),
            capacity: self.config.capacity,
        }
    }

    fn connect(&self, endpoint: &str) -> Result<TcpStream, TransportError> {
        let addrs = endpoint
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(endpoint.to_string()))?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    self.configure(&stream).map_err(|source| TransportError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(source) => Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                source,
            }),
            None => Err(TransportError::Resolve(endpoint.to_string())),
        }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.config.io_timeout))?;
        stream.set_write_timeout(Some(self.config.io_timeout))
    }
}

impl Drop for SocketCache {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Probes an idle socket without blocking.
///
/// Alive means no pending error, no EOF, and no unsolicited bytes waiting.
fn is_alive(stream: &TcpStream) -> bool {
    if !matches!(stream.take_error(), Ok(None)) {
        return false;
    }
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut probe = [0_u8; 1];
    let alive = match stream.peek(&mut probe) {
        Err(err) => err.kind() == ErrorKind::WouldBlock,
        Ok(_) => false,
    };
    stream.set_nonblocking(false).is_ok() && alive
}
