//! The capability the shard is given for each connection.
//!
//! A transport hands the shard a boxed [`Connection`] when a client joins and
//! forwards everything else it receives as [`ShardEvent`]s. The shard never
//! sees sockets; it only ever calls [`Connection::send`].

use snake_shared::{Packet, Player};
use std::sync::{Arc, Mutex};

pub type ConnectionId = u32;

pub trait Connection: Send {
    fn id(&self) -> ConnectionId;

    /// Queues a packet for delivery. Never blocks and never fails loudly.
    fn send(&self, packet: Packet);
}

/// Inbound events, applied by the shard between ticks.
pub enum ShardEvent {
    Joined {
        connection: Box<dyn Connection>,
        resume: Option<Player>,
    },
    Packet {
        id: ConnectionId,
        packet: Packet,
    },
    Error {
        id: ConnectionId,
        reason: String,
    },
    Disconnected {
        id: ConnectionId,
    },
    Shutdown,
}

/// In-process connection that records everything sent to it.
///
/// Clones share the same outbox, so a caller can hand one clone to the shard
/// and read packets back from another.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    id: ConnectionId,
    outbox: Arc<Mutex<Vec<Packet>>>,
}

impl MemoryConnection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            outbox: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Removes and returns every packet sent so far.
    pub fn drain(&self) -> Vec<Packet> {
        let mut outbox = self.outbox.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *outbox)
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, packet: Packet) {
        self.outbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_connection_shares_outbox() {
        let connection = MemoryConnection::new(3);
        let boxed: Box<dyn Connection> = Box::new(connection.clone());

        assert_eq!(boxed.id(), 3);
        boxed.send(Packet::Die { score: 4 });
        boxed.send(Packet::Restart);

        assert_eq!(connection.sent().len(), 2);
        let drained = connection.drain();
        assert!(matches!(drained[0], Packet::Die { score: 4 }));
        assert!(connection.drain().is_empty());
    }
}
