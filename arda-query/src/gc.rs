//! Periodic garbage collection of expired, unobserved queries.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::runtime::QueryRuntime;

/// Default pause between collection passes.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Run [`QueryRuntime::garbage_collect`] every `period` until `shutdown_rx` turns `true`.
///
/// Returns the total number of entries collected.
pub async fn gc_task(runtime: QueryRuntime, period: Duration, mut shutdown_rx: watch::Receiver<bool>) -> u64 {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut collected: u64 = 0;

    tracing::info!(interval_ms = period.as_millis() as u64, "Query GC task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!(collected, "Query GC task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                let removed = runtime.garbage_collect(arda_core::now());
                collected += removed as u64;
                if removed > 0 {
                    tracing::debug!(removed, "GC pass removed expired queries");
                }
            }
        }
    }

    collected
}

/// Spawn [`gc_task`] on the current runtime.
pub fn spawn_gc_task(runtime: QueryRuntime, period: Duration, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<u64> {
    tokio::spawn(gc_task(runtime, period, shutdown_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::QueryOptions;
    use arda_core::query_key;

    #[tokio::test(start_paused = true)]
    async fn test_gc_task_collects_and_stops() {
        let runtime = QueryRuntime::new();
        let options = QueryOptions::new().with_gc_time(Duration::ZERO);
        runtime.set_query_data(&query_key!["menus", "USER"], &1, &options).unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_gc_task(runtime.clone(), Duration::from_secs(1), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(runtime.store().is_empty());

        shutdown_tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 1);
    }
}
