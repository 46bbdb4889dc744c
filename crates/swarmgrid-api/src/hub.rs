//! Connection hub: routes coordinator output to device sockets.
//!
//! Each connected socket owns an unbounded receiver; the hub keeps the
//! matching sender under the connection id it handed out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info};

use swarmgrid_core::{ConnectionId, Outbound, ServerMessage, Target};

/// Live device connections keyed by connection id.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHub {
    connections: Arc<RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerMessage>>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a connection id and its message queue.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = format!("conn-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(id.clone(), tx);
        (id, rx)
    }

    pub async fn disconnect(&self, connection_id: &str) -> bool {
        self.connections.write().await.remove(connection_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Route one message. Returns how many connections received it.
    pub async fn deliver(&self, outbound: Outbound) -> usize {
        let connections = self.connections.read().await;
        match outbound.target {
            Target::Connection(id) => {
                let delivered = connections
                    .get(&id)
                    .is_some_and(|tx| tx.send(outbound.message).is_ok());
                if !delivered {
                    debug!(connection_id = %id, "message for closed connection dropped");
                }
                usize::from(delivered)
            }
            Target::Broadcast => connections
                .values()
                .filter(|tx| tx.send(outbound.message.clone()).is_ok())
                .count(),
        }
    }

    /// Forward coordinator output until the channel closes or shutdown.
    pub async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("connection hub started");
        loop {
            tokio::select! {
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    self.deliver(message).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("connection hub stopped");
    }
}
