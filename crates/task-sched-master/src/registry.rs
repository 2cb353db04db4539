use std::collections::HashMap;
use std::net::SocketAddr;

use task_sched_core::WorkerId;
use task_sched_protocol::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Internal connection identity, drawn from a monotonic counter. Plays the
/// role a raw descriptor would, without being recyclable.
pub(crate) type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Unidentified,
    Worker(WorkerId),
    Client,
}

/// Per-connection state. Owned exclusively by the master's event loop; other
/// components interact with a connection only through its outbound sender.
pub(crate) struct ConnectionRecord {
    pub conn_id: ConnId,
    pub peer_addr: SocketAddr,
    pub role: Role,
    pub outbound: mpsc::Sender<Message>,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

pub(crate) struct ConnectionRegistry {
    connections: HashMap<ConnId, ConnectionRecord>,
    workers: HashMap<WorkerId, ConnId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: HashMap::new(),
            workers: HashMap::new(),
        }
    }

    pub fn insert(&mut self, record: ConnectionRecord) {
        self.connections.insert(record.conn_id, record);
    }

    pub fn get(&self, conn_id: ConnId) -> Option<&ConnectionRecord> {
        self.connections.get(&conn_id)
    }

    /// Promote an unidentified connection to a worker with a fresh id.
    pub fn identify_worker(
        &mut self,
        conn_id: ConnId,
        worker_id: WorkerId,
    ) -> Option<&ConnectionRecord> {
        let record = self.connections.get_mut(&conn_id)?;
        record.role = Role::Worker(worker_id);
        self.workers.insert(worker_id, conn_id);
        Some(record)
    }

    /// Promote an unidentified connection to a task-submitting client.
    pub fn identify_client(&mut self, conn_id: ConnId) -> Option<&ConnectionRecord> {
        let record = self.connections.get_mut(&conn_id)?;
        if record.role == Role::Unidentified {
            record.role = Role::Client;
        }
        Some(record)
    }

    pub fn worker_conn(&self, worker_id: WorkerId) -> Option<ConnId> {
        self.workers.get(&worker_id).copied()
    }

    /// Remove a connection, dropping the worker index entry if it had one.
    pub fn remove(&mut self, conn_id: ConnId) -> Option<ConnectionRecord> {
        let record = self.connections.remove(&conn_id)?;
        if let Role::Worker(worker_id) = record.role {
            self.workers.remove(&worker_id);
        }
        Some(record)
    }

    pub fn drain(&mut self) -> Vec<ConnectionRecord> {
        self.workers.clear();
        self.connections.drain().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
