use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use task_sched_core::WorkerId;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Detects workers that stop heartbeating without a transport-level
/// disconnect (e.g. half-open connections).
///
/// The monitor never touches the connection registry itself: expired ids are
/// reported on a channel drained by the master's event loop, which owns the
/// registry and performs the actual disconnect.
pub struct HeartbeatMonitor {
    workers: Mutex<HashMap<WorkerId, Instant>>,
    expiration: Duration,
    poll_interval: Duration,
    registered: Notify,
    expired_tx: mpsc::Sender<WorkerId>,
    stop_token: CancellationToken,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(
        expiration: Duration,
        poll_interval: Duration,
        expired_tx: mpsc::Sender<WorkerId>,
    ) -> Self {
        HeartbeatMonitor {
            workers: Mutex::new(HashMap::new()),
            expiration,
            poll_interval,
            registered: Notify::new(),
            expired_tx,
            stop_token: CancellationToken::new(),
            monitor_task: Mutex::new(None),
        }
    }

    /// Start tracking a worker, waking the monitor if it was parked on an
    /// empty table.
    pub fn add_worker(&self, worker_id: WorkerId) {
        self.workers.lock().insert(worker_id, Instant::now());
        self.registered.notify_one();
    }

    /// Refresh a worker's last-seen time. A heartbeat for an unregistered id
    /// never creates an entry.
    pub fn register_heartbeat(&self, worker_id: WorkerId) {
        let mut workers = self.workers.lock();
        match workers.get_mut(&worker_id) {
            Some(last_seen) => {
                *last_seen = Instant::now();
                debug!(worker_id, "heartbeat registered");
            }
            None => warn!(worker_id, "heartbeat for unregistered worker ignored"),
        }
    }

    /// Stop tracking a worker. Called on every disconnect path so a stale
    /// entry cannot expire later.
    pub fn disconnect_worker(&self, worker_id: WorkerId) {
        self.workers.lock().remove(&worker_id);
    }

    pub fn tracked(&self) -> usize {
        self.workers.lock().len()
    }

    /// Spawn the monitor loop.
    pub fn activate(self: &Arc<Self>) {
        let monitor = self.clone();
        let handle = tokio::spawn(async move { monitor.svc().await });
        *self.monitor_task.lock() = Some(handle);
    }

    /// Stop the monitor loop, waking any blocked wait immediately, and join
    /// it.
    pub async fn stop(&self) {
        self.stop_token.cancel();
        let handle = self.monitor_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn svc(&self) {
        debug!("heartbeat monitor running");
        loop {
            if self.stop_token.is_cancelled() {
                break;
            }

            // Park until there is something to watch.
            if self.tracked() == 0 {
                tokio::select! {
                    _ = self.registered.notified() => continue,
                    _ = self.stop_token.cancelled() => break,
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.stop_token.cancelled() => break,
            }

            for worker_id in self.collect_expired() {
                warn!(worker_id, "worker heartbeat expired");
                if self.expired_tx.send(worker_id).await.is_err() {
                    return;
                }
            }
        }
        debug!("heartbeat monitor stopped");
    }

    /// Remove and return every worker whose last heartbeat is older than the
    /// expiration window. Removing here makes expiry exactly-once: the next
    /// scan cannot report the same id again.
    fn collect_expired(&self) -> Vec<WorkerId> {
        let mut workers = self.workers.lock();
        let now = Instant::now();
        let expired: Vec<WorkerId> = workers
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) > self.expiration)
            .map(|(worker_id, _)| *worker_id)
            .collect();
        for worker_id in &expired {
            workers.remove(worker_id);
        }
        expired
    }

    #[cfg(test)]
    fn set_last_seen(&self, worker_id: WorkerId, instant: Instant) {
        self.workers.lock().insert(worker_id, instant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn monitor(
        expiration_ms: u64,
        poll_ms: u64,
    ) -> (Arc<HeartbeatMonitor>, mpsc::Receiver<WorkerId>) {
        let (expired_tx, expired_rx) = mpsc::channel(16);
        let monitor = Arc::new(HeartbeatMonitor::new(
            Duration::from_millis(expiration_ms),
            Duration::from_millis(poll_ms),
            expired_tx,
        ));
        (monitor, expired_rx)
    }

    #[tokio::test]
    async fn heartbeat_for_unknown_worker_never_creates_entry() {
        let (monitor, _rx) = monitor(1000, 100);
        monitor.register_heartbeat(42);
        assert_eq!(monitor.tracked(), 0);
    }

    #[tokio::test]
    async fn heartbeat_refreshes_known_worker() {
        let (monitor, _rx) = monitor(1000, 100);
        monitor.add_worker(1);
        monitor.set_last_seen(1, Instant::now() - Duration::from_secs(10));
        monitor.register_heartbeat(1);
        // Refreshed entry must no longer be expired.
        assert!(monitor.collect_expired().is_empty());
    }

    #[tokio::test]
    async fn expired_worker_is_collected_exactly_once() {
        let (monitor, _rx) = monitor(50, 10);
        monitor.add_worker(1);
        monitor.set_last_seen(1, Instant::now() - Duration::from_secs(1));

        assert_eq!(monitor.collect_expired(), vec![1]);
        assert!(monitor.collect_expired().is_empty());
        assert_eq!(monitor.tracked(), 0);
    }

    #[tokio::test]
    async fn monitor_loop_reports_expiry_on_channel() {
        let (monitor, mut expired_rx) = monitor(50, 10);
        monitor.add_worker(7);
        monitor.set_last_seen(7, Instant::now() - Duration::from_secs(1));
        monitor.activate();

        let expired = timeout(Duration::from_secs(1), expired_rx.recv())
            .await
            .expect("no expiry reported");
        assert_eq!(expired, Some(7));

        monitor.stop().await;
    }

    #[tokio::test]
    async fn disconnect_prevents_future_expiry() {
        let (monitor, _rx) = monitor(50, 10);
        monitor.add_worker(3);
        monitor.disconnect_worker(3);
        monitor.set_last_seen(4, Instant::now() - Duration::from_secs(1));
        monitor.disconnect_worker(4);

        assert!(monitor.collect_expired().is_empty());
        assert_eq!(monitor.tracked(), 0);
    }

    #[tokio::test]
    async fn stop_wakes_monitor_parked_on_empty_table() {
        let (monitor, _rx) = monitor(5000, 5000);
        monitor.activate();

        // With no workers and long intervals, only the stop signal can end
        // the loop promptly.
        timeout(Duration::from_secs(1), monitor.stop())
            .await
            .expect("stop did not return promptly");
    }
}
