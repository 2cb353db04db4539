use futures::{SinkExt, StreamExt};
use task_sched_core::Task;
use task_sched_protocol::{Message, MessageCodec, SubmitTask};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Task submission client. Opens one connection per submission; the master
/// classifies the connection as a client on the first `SubmitTask` frame.
pub struct SchedulerClient {
    master_address: String,
}

impl SchedulerClient {
    pub fn new(master_address: impl Into<String>) -> Self {
        SchedulerClient {
            master_address: master_address.into(),
        }
    }

    /// Submit a task for scheduling; resolves to whether the master
    /// accepted it.
    pub async fn submit(&self, task: Task) -> Result<bool> {
        let addr = &self.master_address;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let mut framed = Framed::new(stream, MessageCodec);

        framed
            .send(Message::SubmitTask(SubmitTask { task }))
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        match framed.next().await {
            Some(Ok(Message::SubmitResponse(response))) => Ok(response.accepted),
            Some(Ok(other)) => Err(ClientError::Protocol(format!(
                "unexpected reply: {:?}",
                other.message_type()
            ))),
            Some(Err(e)) => Err(ClientError::Protocol(e.to_string())),
            None => Err(ClientError::Protocol(
                "connection closed before response".to_string(),
            )),
        }
    }

    /// Convenience wrapper building the task from a type name.
    pub async fn submit_type(&self, task_type: impl Into<String>) -> Result<bool> {
        self.submit(Task::new(task_type)).await
    }
}
