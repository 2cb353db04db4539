use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use task_sched_core::WorkerId;
use task_sched_protocol::{Message, MessageCodec, TaskResponse};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::handler::TaskHandlerRegistry;

type FramedConn = Framed<TcpStream, MessageCodec>;
type ConnSink = SplitSink<FramedConn, Message>;
type ConnStream = SplitStream<FramedConn>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("connection lost: {0}")]
    Transport(String),

    #[error("operation invalid for the worker's current state")]
    InvalidState,
}

/// Client-side worker: connects, handshakes for an identity, then runs a
/// receive/execute/respond loop while a heartbeat task keeps the liveness
/// signal flowing over the same connection.
pub struct Worker {
    config: WorkerConfig,
    handlers: Arc<TaskHandlerRegistry>,
    conn: Option<FramedConn>,
    worker_id: Option<WorkerId>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(config: WorkerConfig, handlers: TaskHandlerRegistry) -> Self {
        Worker {
            config,
            handlers: Arc::new(handlers),
            conn: None,
            worker_id: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Identity assigned by the master, available once connected.
    pub fn worker_id(&self) -> Option<WorkerId> {
        self.worker_id
    }

    /// Token for requesting a graceful teardown from another task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect to the master and perform the handshake. On success the
    /// worker holds an assigned identity and is ready to run.
    pub async fn connect(&mut self) -> Result<(), WorkerError> {
        if self.conn.is_some() {
            return Err(WorkerError::InvalidState);
        }

        let addr = self.config.master_address.clone();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| WorkerError::Connect { addr: addr.clone(), source })?;
        let mut conn = Framed::new(stream, MessageCodec);

        conn.send(Message::handshake_request())
            .await
            .map_err(|e| WorkerError::Handshake(e.to_string()))?;

        let worker_id = match conn.next().await {
            Some(Ok(Message::HandshakeResponse(response))) => response.worker_id,
            Some(Ok(other)) => {
                return Err(WorkerError::Handshake(format!(
                    "unexpected reply: {:?}",
                    other.message_type()
                )))
            }
            Some(Err(e)) => return Err(WorkerError::Handshake(e.to_string())),
            None => {
                return Err(WorkerError::Handshake(
                    "connection closed during handshake".to_string(),
                ))
            }
        };

        info!(worker_id, master = %addr, "worker registered");
        self.worker_id = Some(worker_id);
        self.conn = Some(conn);
        Ok(())
    }

    /// Receive/execute/respond until the connection dies or shutdown is
    /// requested. Valid only after a successful [`connect`](Self::connect);
    /// not reentrant.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        let conn = self.conn.take().ok_or(WorkerError::InvalidState)?;
        let worker_id = self.worker_id.take().ok_or(WorkerError::InvalidState)?;

        let (sink, mut stream) = conn.split();
        let sink = Arc::new(Mutex::new(sink));

        // Connection-scoped token: tripped by external shutdown, by a fatal
        // heartbeat failure, or when the receive path ends.
        let conn_token = self.shutdown.child_token();
        let heartbeat = tokio::spawn(heartbeat_loop(
            worker_id,
            sink.clone(),
            Duration::from_millis(self.config.heartbeat_interval_ms),
            self.config.heartbeat_failure_tolerance,
            conn_token.clone(),
        ));

        let result = self
            .receive_loop(worker_id, &mut stream, &sink, &conn_token)
            .await;

        // Strict teardown order: stop the heartbeat task, join it, then drop
        // the transport. Nothing may touch the connection after this point.
        conn_token.cancel();
        let heartbeat_fatal = heartbeat.await.unwrap_or(false);
        drop(stream);
        drop(sink);

        info!(worker_id, "worker disconnected");
        match result {
            Err(e) => Err(e),
            Ok(()) if heartbeat_fatal => Err(WorkerError::Transport(
                "heartbeat path failed".to_string(),
            )),
            Ok(()) => Ok(()),
        }
    }

    async fn receive_loop(
        &self,
        worker_id: WorkerId,
        stream: &mut ConnStream,
        sink: &Arc<Mutex<ConnSink>>,
        conn_token: &CancellationToken,
    ) -> Result<(), WorkerError> {
        loop {
            tokio::select! {
                _ = conn_token.cancelled() => return Ok(()),
                frame = stream.next() => match frame {
                    Some(Ok(Message::TaskRequest(request))) => {
                        let task = request.task;
                        debug!(worker_id, task_type = %task.task_type, "task received");
                        // Execution is synchronous: one task at a time, not
                        // preemptible once started.
                        let success = self.handlers.execute(&task).await;
                        debug!(worker_id, task_type = %task.task_type, success, "task finished");

                        let response = Message::TaskResponse(TaskResponse { success });
                        if let Err(e) = sink.lock().await.send(response).await {
                            return Err(WorkerError::Transport(e.to_string()));
                        }
                    }
                    Some(Ok(other)) => {
                        warn!(
                            worker_id,
                            message_type = ?other.message_type(),
                            "unexpected message ignored"
                        );
                    }
                    Some(Err(e)) => return Err(WorkerError::Transport(e.to_string())),
                    None => {
                        info!(worker_id, "master closed the connection");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Send a heartbeat every interval until told to stop.
///
/// Returns true if the loop tore the connection down itself: a connection
/// whose liveness signal is dead must not keep executing tasks, so once the
/// failure tolerance is exhausted the connection token is cancelled.
async fn heartbeat_loop(
    worker_id: WorkerId,
    sink: Arc<Mutex<ConnSink>>,
    interval: Duration,
    failure_tolerance: u32,
    conn_token: CancellationToken,
) -> bool {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = conn_token.cancelled() => return false,
            _ = ticker.tick() => {
                let result = sink.lock().await.send(Message::heartbeat()).await;
                match result {
                    Ok(()) => {
                        consecutive_failures = 0;
                        debug!(worker_id, "heartbeat sent");
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(
                            worker_id,
                            error = %e,
                            consecutive_failures,
                            "heartbeat send failed"
                        );
                        if consecutive_failures > failure_tolerance {
                            error!(worker_id, "liveness path dead, tearing down connection");
                            conn_token.cancel();
                            return true;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoopHandler;

    fn registry() -> TaskHandlerRegistry {
        let registry = TaskHandlerRegistry::new();
        registry.register("noop", NoopHandler);
        registry
    }

    #[tokio::test]
    async fn run_before_connect_is_invalid() {
        let mut worker = Worker::new(WorkerConfig::default(), registry());
        assert!(matches!(worker.run().await, Err(WorkerError::InvalidState)));
    }

    #[tokio::test]
    async fn connect_to_unreachable_master_fails() {
        let config = WorkerConfig {
            // Reserved TEST-NET-1 address; nothing listens there.
            master_address: "192.0.2.1:1".to_string(),
            heartbeat_interval_ms: 100,
            heartbeat_failure_tolerance: 0,
        };
        let mut worker = Worker::new(config, registry());

        let result = tokio::time::timeout(Duration::from_secs(5), worker.connect()).await;
        match result {
            Ok(Err(WorkerError::Connect { .. })) => {}
            Ok(other) => panic!("expected Connect error, got {other:?}"),
            // Some environments block instead of refusing; a timeout still
            // proves no handshake happened.
            Err(_) => {}
        }
        assert!(worker.worker_id().is_none());
    }

    #[tokio::test]
    async fn handshake_failure_when_master_closes_early() {
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and immediately drop the connection.
            let _ = listener.accept().await;
        });

        let config = WorkerConfig {
            master_address: addr.to_string(),
            heartbeat_interval_ms: 100,
            heartbeat_failure_tolerance: 0,
        };
        let mut worker = Worker::new(config, registry());

        match worker.connect().await {
            Err(WorkerError::Handshake(_)) => {}
            other => panic!("expected Handshake error, got {other:?}"),
        }
    }
}
