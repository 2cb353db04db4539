use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use task_sched_core::{LockFreeQueue, MutexQueue, Task, WorkerId};
use task_sched_protocol::{HandshakeResponse, Message, MessageCodec, SubmitResponse};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MasterConfig;
use crate::distributor::{Distributor, WorkerHandle};
use crate::monitor::HeartbeatMonitor;
use crate::registry::{ConnId, ConnectionRecord, ConnectionRegistry, Role};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum MasterError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// Counters exposed for observability and tests.
#[derive(Debug, Default)]
pub struct MasterStats {
    pub connections: AtomicUsize,
    pub workers: AtomicUsize,
    pub results_succeeded: AtomicU64,
    pub results_failed: AtomicU64,
}

/// Notifications funnelled into the event loop by per-connection reader
/// tasks. Routing everything through one channel gives the connection
/// registry a single owning task.
enum Event {
    Frame(ConnId, Message),
    Closed(ConnId),
}

/// Server-side coordinator: accepts connections, routes messages by
/// connection role and message type, and owns the [`Distributor`] and
/// [`HeartbeatMonitor`].
pub struct Master {
    listener: TcpListener,
    local_addr: SocketAddr,
    distributor: Arc<Distributor>,
    monitor: Arc<HeartbeatMonitor>,
    stats: Arc<MasterStats>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    expired_rx: mpsc::Receiver<WorkerId>,
    shutdown: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// Cheap handle for stopping a running master from another task.
#[derive(Clone)]
pub struct MasterHandle {
    shutdown: CancellationToken,
    done: watch::Receiver<bool>,
}

impl MasterHandle {
    /// Request shutdown and block until the event loop has fully exited.
    /// Idempotent: every caller returns once the loop is down.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut done = self.done.clone();
        let _ = done.wait_for(|stopped| *stopped).await;
    }
}

impl Master {
    /// Bind the listening socket and assemble the subsystems. Fails only on
    /// socket setup; everything after this point recovers locally.
    pub async fn listen(config: MasterConfig) -> Result<Self, MasterError> {
        let addr = format!("{}:{}", config.network.host, config.network.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| MasterError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| MasterError::Bind { addr, source })?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (expired_tx, expired_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let monitor = Arc::new(HeartbeatMonitor::new(
            Duration::from_millis(config.liveness.heartbeat_expiration_ms),
            Duration::from_millis(config.liveness.monitor_poll_ms),
            expired_tx,
        ));
        let distributor = if config.scheduler.lock_free_queues {
            Arc::new(Distributor::with_queues(
                Arc::new(LockFreeQueue::new()),
                Arc::new(LockFreeQueue::new()),
            ))
        } else {
            Arc::new(Distributor::with_queues(
                Arc::new(MutexQueue::new()),
                Arc::new(MutexQueue::new()),
            ))
        };

        let (done_tx, done_rx) = watch::channel(false);

        info!(%local_addr, "master listening");
        Ok(Master {
            listener,
            local_addr,
            distributor,
            monitor,
            stats: Arc::new(MasterStats::default()),
            events_tx,
            events_rx,
            expired_rx,
            shutdown: CancellationToken::new(),
            done_tx,
            done_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> MasterHandle {
        MasterHandle {
            shutdown: self.shutdown.clone(),
            done: self.done_rx.clone(),
        }
    }

    pub fn stats(&self) -> Arc<MasterStats> {
        self.stats.clone()
    }

    pub fn distributor(&self) -> Arc<Distributor> {
        self.distributor.clone()
    }

    pub fn monitor(&self) -> Arc<HeartbeatMonitor> {
        self.monitor.clone()
    }

    /// Run the event loop until a [`MasterHandle::stop`] is observed.
    ///
    /// Every mutation of the connection registry happens on this task: frames
    /// and EOF notices arrive through the event channel, and heartbeat
    /// expiries arrive through the monitor's channel, so cross-thread
    /// disconnects never race an in-flight read on the same connection.
    pub async fn run(self) {
        let Master {
            listener,
            local_addr: _,
            distributor,
            monitor,
            stats,
            events_tx,
            mut events_rx,
            mut expired_rx,
            shutdown,
            done_tx,
            done_rx: _,
        } = self;

        monitor.activate();
        distributor.start();

        let mut state = EventLoop {
            registry: ConnectionRegistry::new(),
            next_conn_id: 1,
            next_worker_id: 1,
            events_tx,
            distributor: distributor.clone(),
            monitor: monitor.clone(),
            stats,
        };

        info!("master running");
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => state.accept(stream, peer_addr),
                    Err(e) => error!(error = %e, "accept failed"),
                },
                Some(event) = events_rx.recv() => state.handle_event(event),
                Some(worker_id) = expired_rx.recv() => state.handle_expiry(worker_id),
                _ = shutdown.cancelled() => break,
            }
        }

        info!(
            open_connections = state.registry.len(),
            workers = state.registry.worker_count(),
            "master shutting down"
        );
        distributor.stop().await;
        monitor.stop().await;
        state.close_all();
        let _ = done_tx.send(true);
    }
}

/// The event loop's mutable state. Only [`Master::run`] touches it.
struct EventLoop {
    registry: ConnectionRegistry,
    next_conn_id: ConnId,
    next_worker_id: WorkerId,
    events_tx: mpsc::Sender<Event>,
    distributor: Arc<Distributor>,
    monitor: Arc<HeartbeatMonitor>,
    stats: Arc<MasterStats>,
}

impl EventLoop {
    fn accept(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_loop(conn_id, read_half, self.events_tx.clone()));
        let writer = tokio::spawn(write_loop(conn_id, write_half, outbound_rx));

        self.registry.insert(ConnectionRecord {
            conn_id,
            peer_addr,
            role: Role::Unidentified,
            outbound: outbound_tx,
            reader,
            writer,
        });
        self.stats.connections.fetch_add(1, Ordering::Relaxed);
        info!(conn_id, peer = %peer_addr, "accepted connection");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Frame(conn_id, message) => self.dispatch(conn_id, message),
            Event::Closed(conn_id) => self.disconnect(conn_id, "connection closed"),
        }
    }

    fn dispatch(&mut self, conn_id: ConnId, message: Message) {
        let role = match self.registry.get(conn_id) {
            Some(record) => record.role,
            None => {
                // Raced with a disconnect; there is nothing to route to.
                debug!(conn_id, "frame for unknown connection dropped");
                return;
            }
        };

        match (role, message) {
            (Role::Unidentified, Message::HandshakeRequest(_)) => self.identify_worker(conn_id),
            (Role::Worker(worker_id), Message::HandshakeRequest(_)) => {
                warn!(conn_id, worker_id, "duplicate handshake rejected");
            }
            (Role::Worker(worker_id), Message::Heartbeat(_)) => {
                self.monitor.register_heartbeat(worker_id);
            }
            (Role::Worker(worker_id), Message::TaskResponse(response)) => {
                self.record_result(conn_id, worker_id, response.success);
            }
            (Role::Unidentified | Role::Client, Message::SubmitTask(request)) => {
                self.accept_submission(conn_id, request.task);
            }
            (role, message) => {
                warn!(
                    conn_id,
                    ?role,
                    message_type = ?message.message_type(),
                    "message invalid for connection state"
                );
                self.disconnect(conn_id, "protocol violation");
            }
        }
    }

    /// Handshake: assign a fresh worker id, reply, and register the worker
    /// with the heartbeat monitor and the available pool.
    fn identify_worker(&mut self, conn_id: ConnId) {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        let outbound = match self.registry.identify_worker(conn_id, worker_id) {
            Some(record) => record.outbound.clone(),
            None => return,
        };

        let response = Message::HandshakeResponse(HandshakeResponse { worker_id });
        if outbound.try_send(response).is_err() {
            warn!(conn_id, worker_id, "failed to send handshake response");
            self.disconnect(conn_id, "send failure");
            return;
        }

        self.monitor.add_worker(worker_id);
        self.distributor
            .add_worker(WorkerHandle::new(worker_id, outbound));
        self.stats.workers.fetch_add(1, Ordering::Relaxed);
        info!(conn_id, worker_id, "worker registered");
    }

    /// Task response: record the outcome and return the worker to the
    /// available pool.
    fn record_result(&mut self, conn_id: ConnId, worker_id: WorkerId, success: bool) {
        if success {
            self.stats.results_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.results_failed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(conn_id, worker_id, success, "task result recorded");

        let outbound = match self.registry.get(conn_id) {
            Some(record) => record.outbound.clone(),
            None => return,
        };
        self.distributor
            .add_worker(WorkerHandle::new(worker_id, outbound));
    }

    fn accept_submission(&mut self, conn_id: ConnId, task: Task) {
        let outbound = match self.registry.identify_client(conn_id) {
            Some(record) => record.outbound.clone(),
            None => return,
        };

        info!(conn_id, task_type = %task.task_type, "task submitted");
        self.distributor.add_task(task);

        let response = Message::SubmitResponse(SubmitResponse { accepted: true });
        if outbound.try_send(response).is_err() {
            self.disconnect(conn_id, "send failure");
        }
    }

    fn handle_expiry(&mut self, worker_id: WorkerId) {
        match self.registry.worker_conn(worker_id) {
            Some(conn_id) => self.disconnect(conn_id, "heartbeat expired"),
            // Already gone through the EOF path; nothing to do.
            None => debug!(worker_id, "expiry for unknown worker ignored"),
        }
    }

    /// Deregister a connection everywhere and close its transport. Safe to
    /// call twice: the second call finds nothing in the registry.
    fn disconnect(&mut self, conn_id: ConnId, reason: &str) {
        let Some(record) = self.registry.remove(conn_id) else {
            return;
        };
        record.reader.abort();
        record.writer.abort();
        if let Role::Worker(worker_id) = record.role {
            self.monitor.disconnect_worker(worker_id);
            self.stats.workers.fetch_sub(1, Ordering::Relaxed);
            info!(conn_id, worker_id, peer = %record.peer_addr, reason, "worker disconnected");
        } else {
            info!(conn_id, peer = %record.peer_addr, reason, "connection closed");
        }
        self.stats.connections.fetch_sub(1, Ordering::Relaxed);
    }

    fn close_all(&mut self) {
        for record in self.registry.drain() {
            record.reader.abort();
            record.writer.abort();
        }
        self.stats.connections.store(0, Ordering::Relaxed);
        self.stats.workers.store(0, Ordering::Relaxed);
    }
}

/// Read exactly one frame per iteration and forward it to the event loop.
/// A malformed frame or transport error ends the connection, not the master.
async fn read_loop(conn_id: ConnId, read_half: OwnedReadHalf, events: mpsc::Sender<Event>) {
    let mut frames = FramedRead::new(read_half, MessageCodec);
    loop {
        match frames.next().await {
            Some(Ok(message)) => {
                if events.send(Event::Frame(conn_id, message)).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(conn_id, error = %e, "protocol error");
                let _ = events.send(Event::Closed(conn_id)).await;
                break;
            }
            None => {
                let _ = events.send(Event::Closed(conn_id)).await;
                break;
            }
        }
    }
}

/// Drain the connection's outbound queue into the socket. Ends when the
/// sender side is dropped or the transport fails; the reader surfaces the
/// failure as an EOF shortly after.
async fn write_loop(
    conn_id: ConnId,
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Message>,
) {
    let mut sink = FramedWrite::new(write_half, MessageCodec);
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!(conn_id, error = %e, "write failed");
            break;
        }
    }
}
