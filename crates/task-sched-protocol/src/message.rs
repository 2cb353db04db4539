use serde::{Deserialize, Serialize};
use task_sched_core::{Task, WorkerId};

/// Message types for the TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    HandshakeRequest = 1,
    HandshakeResponse = 2,
    Heartbeat = 3,
    TaskRequest = 4,
    TaskResponse = 5,
    SubmitTask = 6,
    SubmitResponse = 7,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::HandshakeRequest),
            2 => Some(MessageType::HandshakeResponse),
            3 => Some(MessageType::Heartbeat),
            4 => Some(MessageType::TaskRequest),
            5 => Some(MessageType::TaskResponse),
            6 => Some(MessageType::SubmitTask),
            7 => Some(MessageType::SubmitResponse),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Worker introduces itself and asks for an identity
    HandshakeRequest(HandshakeRequest),

    /// Master assigns a worker id
    HandshakeResponse(HandshakeResponse),

    /// Worker liveness signal
    Heartbeat(Heartbeat),

    /// Master dispatches a task to a worker
    TaskRequest(TaskRequest),

    /// Worker reports a task outcome
    TaskResponse(TaskResponse),

    /// Client submits a task for scheduling
    SubmitTask(SubmitTask),

    /// Master acknowledges a submission
    SubmitResponse(SubmitResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::HandshakeRequest(_) => MessageType::HandshakeRequest,
            Message::HandshakeResponse(_) => MessageType::HandshakeResponse,
            Message::Heartbeat(_) => MessageType::Heartbeat,
            Message::TaskRequest(_) => MessageType::TaskRequest,
            Message::TaskResponse(_) => MessageType::TaskResponse,
            Message::SubmitTask(_) => MessageType::SubmitTask,
            Message::SubmitResponse(_) => MessageType::SubmitResponse,
        }
    }

    pub fn handshake_request() -> Self {
        Message::HandshakeRequest(HandshakeRequest)
    }

    pub fn heartbeat() -> Self {
        Message::Heartbeat(Heartbeat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub worker_id: WorkerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTask {
    pub task: Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::HandshakeRequest));
        assert_eq!(MessageType::from_u8(7), Some(MessageType::SubmitResponse));
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(99), None);

        assert_eq!(MessageType::HandshakeRequest.as_u8(), 1);
        assert_eq!(MessageType::SubmitResponse.as_u8(), 7);
    }

    #[test]
    fn test_message_type_matches_variant() {
        let msg = Message::TaskRequest(TaskRequest {
            task: Task::new("noop"),
        });
        assert_eq!(msg.message_type(), MessageType::TaskRequest);

        assert_eq!(
            Message::heartbeat().message_type(),
            MessageType::Heartbeat
        );
    }
}
