use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hive_core::time::unix_seconds;
use tracing::{debug, warn};

use crate::publishers::Publishers;

/// Background thread that expires stale back-pointers every `interval`.
///
/// Stops when dropped.
pub struct PublisherSweeper {
    running: Arc<AtomicBool>,
    sweeps: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl PublisherSweeper {
    pub fn start(publishers: Arc<Publishers>, interval: Duration) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let sweeps = Arc::new(AtomicU64::new(0));
        let worker_running = Arc::clone(&running);
        let worker_sweeps = Arc::clone(&sweeps);
        let worker = thread::Builder::new()
            .name("hive-sweeper".to_string())
            .spawn(move || {
                let mut next = Instant::now() + interval;
                while worker_running.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    if now < next {
                        thread::park_timeout(next - now);
                        continue;
                    }
                    match publishers.expire(unix_seconds()) {
                        Ok(stats) => debug!(?stats, "publisher sweep finished"),
                        Err(err) => warn!(error = %err, "publisher sweep failed"),
                    }
                    worker_sweeps.fetch_add(1, Ordering::Relaxed);
                    next = Instant::now() + interval;
                }
            })?;
        Ok(Self {
            running,
            sweeps,
            worker: Some(worker),
        })
    }

    /// Completed sweeps.
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
    }
}

impl Drop for PublisherSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use hive_codec::{ObjectMetadata, PublishRecord};
    use hive_core::{Guid, NodeAddress};

    use super::PublisherSweeper;
    use crate::publishers::Publishers;

    #[test]
    fn expires_stale_records_periodically() {
        let publishers = Arc::new(Publishers::default());
        let object_id = Guid::random();
        publishers
            .update(PublishRecord::new(
                object_id,
                NodeAddress::new(Guid::random(), "old", 1),
                ObjectMetadata::new(),
                1,
            ))
            .expect("update should succeed");

        let sweeper = PublisherSweeper::start(Arc::clone(&publishers), Duration::from_millis(20))
            .expect("sweeper should start");
        let deadline = Instant::now() + Duration::from_secs(5);
        while sweeper.sweeps() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(sweeper.sweeps() > 0);
        assert!(publishers.get_publishers(&object_id).is_empty());
    }

    #[test]
    fn stop_returns_promptly_with_long_interval() {
        let publishers = Arc::new(Publishers::default());
        let mut sweeper = PublisherSweeper::start(publishers, Duration::from_secs(3_600))
            .expect("sweeper should start");
        let started = Instant::now();
        sweeper.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(sweeper.sweeps(), 0);
    }
}
