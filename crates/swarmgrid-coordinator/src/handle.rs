//! Shared, lock-guarded access to a coordinator.
//!
//! Every caller (device socket, REST handler, maintenance tick) goes
//! through `SwarmHandle::with`, which serializes the call against all
//! others and forwards any queued device messages once the lock is
//! released.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use swarmgrid_core::{Outbound, SwarmSnapshot};

use crate::coordinator::SwarmCoordinator;

/// Cloneable handle to one coordinator and its outbound channel.
#[derive(Debug, Clone)]
pub struct SwarmHandle {
    inner: Arc<Mutex<SwarmCoordinator>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SwarmHandle {
    pub fn new(coordinator: SwarmCoordinator, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(coordinator)),
            outbound,
        }
    }

    /// Wrap a coordinator and hand back the receiving end of its outbox.
    pub fn channel(coordinator: SwarmCoordinator) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(coordinator, tx), rx)
    }

    /// Run `f` with exclusive access, then forward queued messages.
    pub async fn with<R>(&self, f: impl FnOnce(&mut SwarmCoordinator) -> R) -> R {
        let (result, outbound) = {
            let mut coordinator = self.inner.lock().await;
            let result = f(&mut *coordinator);
            (result, coordinator.drain_outbound())
        };

        for message in outbound {
            if self.outbound.send(message).is_err() {
                debug!("outbound channel closed, dropping messages");
                break;
            }
        }
        result
    }

    pub async fn snapshot(&self) -> SwarmSnapshot {
        self.inner.lock().await.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmgrid_core::{DeviceRegistration, ServerMessage, SwarmConfig, Target};

    #[tokio::test]
    async fn with_forwards_outbox_after_call() {
        let (handle, mut rx) = SwarmHandle::channel(SwarmCoordinator::from_config(
            &SwarmConfig::default(),
        ));

        let id = handle
            .with(|c| {
                c.register_device(
                    "conn-1",
                    DeviceRegistration {
                        name: "tab".to_string(),
                        ..DeviceRegistration::default()
                    },
                )
            })
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.target, Target::Connection("conn-1".to_string()));
        assert_eq!(first.message, ServerMessage::Registered { device_id: id });

        let second = rx.recv().await.unwrap();
        assert_eq!(second.target, Target::Broadcast);
        assert_eq!(handle.snapshot().await.stats.total_devices, 1);
    }

    #[tokio::test]
    async fn closed_channel_does_not_fail_calls() {
        let (handle, rx) = SwarmHandle::channel(SwarmCoordinator::from_config(
            &SwarmConfig::default(),
        ));
        drop(rx);

        handle.with(|c| c.request_benchmark()).await;
        assert_eq!(handle.snapshot().await.stats.total_devices, 0);
    }
}
