use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hive_codec::{write_message, FrameDecoder};
use tracing::{debug, info, trace, warn};

use crate::adapter::MessageHandler;
use crate::error::TransportError;

const READ_CHUNK: usize = 16 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Concurrent inbound connections; extra connections are closed on accept.
    pub max_connections: usize,
    /// Connections with no traffic for this long are closed.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 12001)),
            max_connections: 256,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub accepted: u64,
    pub rejected: u64,
    pub active: usize,
    pub frames_served: u64,
    pub idle_closed: u64,
    pub decode_errors: u64,
}

#[derive(Debug, Default)]
struct ServerMetrics {
    accepted: AtomicU64,
    rejected: AtomicU64,
    active: AtomicUsize,
    frames_served: AtomicU64,
    idle_closed: AtomicU64,
    decode_errors: AtomicU64,
}

/// Thread-per-connection frame server.
///
/// Every connection runs an incremental [`FrameDecoder`] and hands each completed
/// message to the [`MessageHandler`], writing back the reply. A `None` reply closes
/// the connection. Dropping the server stops the accept loop; open connections
/// notice within one poll interval.
pub struct Server {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    metrics: Arc<ServerMetrics>,
    acceptor: Option<JoinHandle<()>>,
}

impl Server {
    pub fn bind(
        config: ServerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(ServerMetrics::default());

        let accept_running = Arc::clone(&running);
        let accept_metrics = Arc::clone(&metrics);
        let acceptor = thread::Builder::new()
            .name("hive-accept".to_string())
            .spawn(move || accept_loop(listener, config, handler, accept_running, accept_metrics))?;

        info!(%local_addr, "server listening");
        Ok(Self {
            local_addr,
            running,
            metrics,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            accepted: self.metrics.accepted.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            active: self.metrics.active.load(Ordering::Relaxed),
            frames_served: self.metrics.frames_served.load(Ordering::Relaxed),
            idle_closed: self.metrics.idle_closed.load(Ordering::Relaxed),
            decode_errors: self.metrics.decode_errors.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting and waits for the accept thread to exit.
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        // Unblock `accept` with a throwaway connection.
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip([127, 0, 0, 1].into());
        }
        let _ = TcpStream::connect_timeout(&wake, Duration::from_secs(1));
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        info!(local_addr = %self.local_addr, "server stopped");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    handler: Arc<dyn MessageHandler>,
    running: Arc<AtomicBool>,
    metrics: Arc<ServerMetrics>,
) {
    for incoming in listener.incoming() {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let stream = match incoming {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        if metrics.active.load(Ordering::Relaxed) >= config.max_connections {
            metrics.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("connection limit reached, closing new connection");
            let _ = stream.shutdown(Shutdown::Both);
            continue;
        }

        metrics.accepted.fetch_add(1, Ordering::Relaxed);
        metrics.active.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(&handler);
        let running = Arc::clone(&running);
        let conn_metrics = Arc::clone(&metrics);
        let idle_timeout = config.idle_timeout;
        let spawned = thread::Builder::new()
            .name("hive-conn".to_string())
            .spawn(move || {
                serve_connection(stream, handler.as_ref(), &running, &conn_metrics, idle_timeout);
                conn_metrics.active.fetch_sub(1, Ordering::Relaxed);
            });
        if let Err(err) = spawned {
            metrics.active.fetch_sub(1, Ordering::Relaxed);
            warn!(error = %err, "failed to spawn connection thread");
        }
    }
}

fn serve_connection(
    mut stream: TcpStream,
    handler: &dyn MessageHandler,
    running: &AtomicBool,
    metrics: &ServerMetrics,
    idle_timeout: Duration,
) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    if let Err(err) = stream.set_read_timeout(Some(POLL_INTERVAL.min(idle_timeout))) {
        warn!(%peer, error = %err, "cannot set read timeout");
        return;
    }
    let _ = stream.set_nodelay(true);

    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0_u8; READ_CHUNK];
    let mut last_activity = Instant::now();

    while running.load(Ordering::Relaxed) {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if last_activity.elapsed() >= idle_timeout {
                    metrics.idle_closed.fetch_add(1, Ordering::Relaxed);
                    trace!(%peer, "closing idle connection");
                    break;
                }
                continue;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(%peer, error = %err, "connection read failed");
                break;
            }
        };
        last_activity = Instant::now();
        decoder.extend(&chunk[..n]);

        loop {
            let request = match decoder.next_message() {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(err) => {
                    metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(%peer, error = %err, "malformed frame, closing connection");
                    let _ = stream.shutdown(Shutdown::Both);
                    return;
                }
            };
            let Some(reply) = handler.handle(request) else {
                debug!(%peer, "no reply produced, closing connection");
                let _ = stream.shutdown(Shutdown::Both);
                return;
            };
            if let Err(err) = write_message(&mut stream, &reply) {
                debug!(%peer, error = %err, "reply write failed");
                return;
            }
            metrics.frames_served.fetch_add(1, Ordering::Relaxed);
            last_activity = Instant::now();
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}
