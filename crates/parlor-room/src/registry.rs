use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use parlor_core::ids::ConnectionId;

/// Connections subscribed to one room's fan-out.
///
/// Owned exclusively by the room actor, so a plain HashMap suffices. Each
/// connection is an outbound sender with a bounded queue; a full queue means
/// the consumer is too slow and the frame is dropped for that connection,
/// a closed queue means the socket task is gone and the entry is pruned.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, mpsc::Sender<String>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    pub fn register(&mut self, id: ConnectionId, sender: mpsc::Sender<String>) {
        debug!(connection_id = %id, "connection registered");
        self.connections.insert(id, sender);
    }

    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(connection_id = %id, "connection unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Deliver a payload to one connection. Returns false if it is gone.
    pub fn send_to(&mut self, id: &ConnectionId, payload: &str) -> bool {
        let Some(sender) = self.connections.get(id) else {
            return false;
        };
        match sender.try_send(payload.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(connection_id = %id, "send queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.connections.remove(id);
                false
            }
        }
    }

    /// Fan a payload out to every connection, optionally excluding the
    /// originator. Returns the number of successful deliveries.
    pub fn broadcast(&mut self, payload: &str, exclude: Option<&ConnectionId>) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, sender) in &self.connections {
            if exclude.is_some_and(|ex| ex == id) {
                continue;
            }
            match sender.try_send(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %id, "send queue full, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(id.clone());
                }
            }
        }

        for id in dead {
            self.connections.remove(&id);
            debug!(connection_id = %id, "pruned closed connection");
        }

        delivered
    }
}
