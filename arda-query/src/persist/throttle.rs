//! Trailing-edge write throttle and the background persister task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::bridge::PersistenceBridge;
use crate::runtime::QueryRuntime;
use crate::store::CacheEvent;

/// Trailing-edge throttle.
///
/// The first change after a quiet period arms a deadline `window` later.
/// Changes arriving before the deadline ride along, and one write of the
/// latest state happens when it fires.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    deadline: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Note a change at `at`. Returns true if this armed a new deadline.
    pub fn touch(&mut self, at: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(at + self.window);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Changes are waiting to be written.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm. Returns whether anything was pending.
    pub fn fire(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}

/// Write snapshots of `runtime` through `bridge` whenever the cache changes,
/// at most once per throttle window, until `shutdown_rx` turns `true`.
///
/// Pending changes are flushed on shutdown. Returns the number of writes.
pub async fn persister_task(
    runtime: QueryRuntime,
    bridge: Arc<PersistenceBridge>,
    shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let events = runtime.subscribe();
    run_persister(runtime, bridge, events, shutdown_rx).await
}

async fn run_persister(
    runtime: QueryRuntime,
    bridge: Arc<PersistenceBridge>,
    mut events: broadcast::Receiver<CacheEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let mut throttle = Throttle::new(bridge.config().throttle());
    let mut writes: u64 = 0;

    tracing::info!(
        throttle_ms = throttle.window().as_millis() as u64,
        storage_key = %bridge.config().storage_key,
        "Persister task started"
    );

    loop {
        let deadline = throttle.deadline();
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            event = events.recv() => match event {
                Ok(_) => {
                    throttle.touch(Instant::now());
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Persister lagged behind cache events");
                    throttle.touch(Instant::now());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                throttle.fire();
                if bridge.persist(&runtime).await {
                    writes += 1;
                }
            }
        }
    }

    // Changes already queued when shutdown won the race still count.
    loop {
        match events.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {
                throttle.touch(Instant::now());
            }
            Err(_) => break,
        }
    }

    if throttle.fire() && bridge.persist(&runtime).await {
        writes += 1;
        tracing::debug!("Flushed pending snapshot on shutdown");
    }
    tracing::info!(writes, "Persister task shutting down");
    writes
}

/// Spawn [`persister_task`] on the current runtime.
///
/// The change feed is subscribed before returning, so changes made right
/// after the call are not missed.
pub fn spawn_persister(
    runtime: QueryRuntime,
    bridge: Arc<PersistenceBridge>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    let events = runtime.subscribe();
    tokio::spawn(run_persister(runtime, bridge, events, shutdown_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_arms_once_per_window() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(1));
        assert!(!throttle.is_pending());
        assert!(throttle.touch(start));
        assert!(!throttle.touch(start + Duration::from_millis(300)));
        assert_eq!(throttle.deadline(), Some(start + Duration::from_secs(1)));

        assert!(throttle.fire());
        assert!(!throttle.fire());
        assert!(throttle.touch(start + Duration::from_secs(2)));
        assert_eq!(throttle.deadline(), Some(start + Duration::from_secs(3)));
    }
}
