use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use task_sched_core::{BlockingQueue, MutexQueue, Task, WorkerId};
use task_sched_protocol::{Message, TaskRequest};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Send path for dispatching a task to one worker's connection.
///
/// The handle carries the connection's outbound sender, so the distributor
/// never touches the connection registry: a dead connection simply makes the
/// send fail.
#[derive(Clone)]
pub struct WorkerHandle {
    worker_id: WorkerId,
    outbound: mpsc::Sender<Message>,
}

impl WorkerHandle {
    pub fn new(worker_id: WorkerId, outbound: mpsc::Sender<Message>) -> Self {
        WorkerHandle {
            worker_id,
            outbound,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    async fn dispatch(&self, task: &Task) -> bool {
        let request = Message::TaskRequest(TaskRequest { task: task.clone() });
        self.outbound.send(request).await.is_ok()
    }
}

/// Pairs available workers with pending tasks from one dedicated matching
/// loop.
///
/// Both pools are strict FIFO: whichever worker becomes available first
/// receives the oldest pending task, independent of the arrival order
/// between the two queues.
pub struct Distributor {
    pending_tasks: Arc<dyn BlockingQueue<Task>>,
    available_workers: Arc<dyn BlockingQueue<WorkerHandle>>,
    dispatched: AtomicU64,
    matching_task: Mutex<Option<JoinHandle<()>>>,
}

impl Distributor {
    pub fn new() -> Self {
        Self::with_queues(Arc::new(MutexQueue::new()), Arc::new(MutexQueue::new()))
    }

    /// Build with caller-supplied queue implementations. Any pair satisfying
    /// the `BlockingQueue` contract works.
    pub fn with_queues(
        pending_tasks: Arc<dyn BlockingQueue<Task>>,
        available_workers: Arc<dyn BlockingQueue<WorkerHandle>>,
    ) -> Self {
        Distributor {
            pending_tasks,
            available_workers,
            dispatched: AtomicU64::new(0),
            matching_task: Mutex::new(None),
        }
    }

    /// Queue a task for dispatch.
    pub fn add_task(&self, task: Task) {
        self.pending_tasks.push(task);
    }

    /// Return a worker to the available pool. Called at registration and
    /// again each time a task response brings the worker back. The master
    /// enqueues a given worker from exactly those two places, so an id is in
    /// the pool at most once at any instant.
    pub fn add_worker(&self, handle: WorkerHandle) {
        self.available_workers.push(handle);
    }

    pub fn pending_len(&self) -> usize {
        self.pending_tasks.len()
    }

    pub fn available_len(&self) -> usize {
        self.available_workers.len()
    }

    /// Total number of task requests handed to workers.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Spawn the matching loop.
    pub fn start(self: &Arc<Self>) {
        let distributor = self.clone();
        let handle = tokio::spawn(async move { distributor.svc().await });
        *self.matching_task.lock() = Some(handle);
    }

    /// Close both pools (waking any blocked pop immediately) and join the
    /// matching loop.
    pub async fn stop(&self) {
        self.pending_tasks.close();
        self.available_workers.close();
        let handle = self.matching_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn svc(&self) {
        debug!("matching loop running");
        // A task popped for a worker that died before dispatch is held here
        // and offered to the next available worker, so a failed send loses
        // the worker but never the task, and FIFO order is preserved.
        let mut redelivery: Option<Task> = None;
        loop {
            let Some(worker) = self.available_workers.pop_wait().await else {
                break;
            };
            let task = match redelivery.take() {
                Some(task) => task,
                None => match self.pending_tasks.pop_wait().await {
                    Some(task) => task,
                    None => break,
                },
            };

            if worker.dispatch(&task).await {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(
                    worker_id = worker.worker_id(),
                    task_type = %task.task_type,
                    "task dispatched"
                );
            } else {
                warn!(
                    worker_id = worker.worker_id(),
                    task_type = %task.task_type,
                    "dispatch failed, holding task for the next worker"
                );
                redelivery = Some(task);
            }
        }
        info!("matching loop stopped");
    }
}

impl Default for Distributor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn worker(worker_id: WorkerId) -> (WorkerHandle, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(8);
        (WorkerHandle::new(worker_id, outbound), rx)
    }

    async fn expect_task(rx: &mut mpsc::Receiver<Message>) -> Task {
        let message = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no dispatch received")
            .expect("connection channel closed");
        match message {
            Message::TaskRequest(request) => request.task,
            other => panic!("expected TaskRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_queued_before_worker_is_dispatched() {
        let distributor = Arc::new(Distributor::new());
        distributor.add_task(Task::new("noop"));

        let (handle, mut rx) = worker(1);
        distributor.start();
        distributor.add_worker(handle);

        let task = expect_task(&mut rx).await;
        assert_eq!(task.task_type, "noop");
        assert_eq!(distributor.dispatched(), 1);

        distributor.stop().await;
    }

    #[tokio::test]
    async fn worker_queued_before_task_is_dispatched() {
        let distributor = Arc::new(Distributor::new());
        let (handle, mut rx) = worker(1);
        distributor.add_worker(handle);

        distributor.start();
        distributor.add_task(Task::new("noop"));

        let task = expect_task(&mut rx).await;
        assert_eq!(task.task_type, "noop");

        distributor.stop().await;
    }

    #[tokio::test]
    async fn pairing_is_fifo_on_both_pools() {
        let distributor = Arc::new(Distributor::new());
        let (first, mut first_rx) = worker(1);
        let (second, mut second_rx) = worker(2);
        distributor.add_worker(first);
        distributor.add_worker(second);
        distributor.add_task(Task::new("a"));
        distributor.add_task(Task::new("b"));

        distributor.start();

        assert_eq!(expect_task(&mut first_rx).await.task_type, "a");
        assert_eq!(expect_task(&mut second_rx).await.task_type, "b");

        distributor.stop().await;
    }

    #[tokio::test]
    async fn failed_dispatch_holds_task_for_next_worker() {
        let distributor = Arc::new(Distributor::new());

        // A worker whose connection is already gone.
        let (dead, dead_rx) = worker(1);
        drop(dead_rx);
        distributor.add_worker(dead);
        distributor.add_task(Task::new("precious"));

        distributor.start();

        // Give the matching loop time to hit the send failure, then offer a
        // healthy worker; the task must not have been lost.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (healthy, mut healthy_rx) = worker(2);
        distributor.add_worker(healthy);

        let task = expect_task(&mut healthy_rx).await;
        assert_eq!(task.task_type, "precious");
        assert_eq!(distributor.dispatched(), 1);

        distributor.stop().await;
    }

    #[tokio::test]
    async fn stop_unblocks_idle_matching_loop() {
        let distributor = Arc::new(Distributor::new());
        distributor.start();

        timeout(Duration::from_secs(1), distributor.stop())
            .await
            .expect("stop did not return promptly");
    }

    #[tokio::test]
    async fn lock_free_queues_are_interchangeable() {
        use task_sched_core::LockFreeQueue;

        let distributor = Arc::new(Distributor::with_queues(
            Arc::new(LockFreeQueue::new()),
            Arc::new(LockFreeQueue::new()),
        ));
        distributor.add_task(Task::new("noop"));
        let (handle, mut rx) = worker(1);
        distributor.start();
        distributor.add_worker(handle);

        assert_eq!(expect_task(&mut rx).await.task_type, "noop");

        distributor.stop().await;
    }
}
