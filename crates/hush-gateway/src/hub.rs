//! Per-instance connection hub.
//!
//! Tracks which devices hold live connections on this instance and feeds
//! their bounded outbound channels. One writer task per connection owns the
//! socket; the hub only ever talks to the channel, so frame order to a
//! given connection is the channel order and nothing contends on the
//! socket itself.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

use hush_common::frame::Frame;

/// Why a connection is being torn down. Sent through the kill channel and
/// logged on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SlowConsumer,
    HeartbeatTimeout,
    Replaced,
    Revoked,
    ServerShutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::SlowConsumer => "slow consumer",
            CloseReason::HeartbeatTimeout => "heartbeat timeout",
            CloseReason::Replaced => "replaced by newer connection",
            CloseReason::Revoked => "session revoked",
            CloseReason::ServerShutdown => "server shutting down",
        }
    }
}

/// Handle to one live connection.
#[derive(Clone)]
pub struct ConnHandle {
    pub connection_id: Uuid,
    pub device_id: Uuid,
    outbound: mpsc::Sender<Frame>,
    kill: watch::Sender<Option<CloseReason>>,
}

impl ConnHandle {
    pub fn new(
        connection_id: Uuid,
        device_id: Uuid,
        outbound: mpsc::Sender<Frame>,
        kill: watch::Sender<Option<CloseReason>>,
    ) -> Self {
        Self {
            connection_id,
            device_id,
            outbound,
            kill,
        }
    }

    /// Non-blocking enqueue. A full channel means the client can't keep up;
    /// the connection is killed and the recipient falls back to the offline
    /// queue on reconnect.
    fn push(&self, frame: Frame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection = %self.connection_id, "Outbound queue full, closing slow consumer");
                let _ = self.kill.send(Some(CloseReason::SlowConsumer));
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn close(&self, reason: CloseReason) {
        let _ = self.kill.send(Some(reason));
    }
}

/// Registry of local connections: user → device → handle.
pub struct Hub {
    connections: RwLock<HashMap<Uuid, HashMap<Uuid, ConnHandle>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection. Returns true when this is the user's first
    /// live connection on this instance (presence + bus subscription
    /// trigger). A stale connection for the same device is replaced.
    pub async fn register(&self, user: Uuid, handle: ConnHandle) -> bool {
        let mut connections = self.connections.write().await;
        let devices = connections.entry(user).or_default();
        let first = devices.is_empty();
        if let Some(old) = devices.insert(handle.device_id, handle) {
            tracing::debug!(device = %old.device_id, "Replacing existing device connection");
            old.close(CloseReason::Replaced);
        }
        first
    }

    /// Remove a connection (only if the id still matches — a replaced
    /// connection must not evict its replacement). Returns true when the
    /// user has no local connections left.
    pub async fn unregister(&self, user: Uuid, device: Uuid, connection_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        let Some(devices) = connections.get_mut(&user) else {
            return false;
        };
        if devices
            .get(&device)
            .is_some_and(|h| h.connection_id == connection_id)
        {
            devices.remove(&device);
        }
        if devices.is_empty() {
            connections.remove(&user);
            true
        } else {
            false
        }
    }

    /// Deliver to every local device of a user (optionally one device).
    /// Returns how many connections accepted the frame.
    pub async fn deliver(&self, user: Uuid, device: Option<Uuid>, frame: &Frame) -> usize {
        let connections = self.connections.read().await;
        let Some(devices) = connections.get(&user) else {
            return 0;
        };
        match device {
            Some(device_id) => devices
                .get(&device_id)
                .map(|h| h.push(frame.clone()) as usize)
                .unwrap_or(0),
            None => devices
                .values()
                .map(|h| h.push(frame.clone()) as usize)
                .sum(),
        }
    }

    /// Deliver to every local device of a user except one (sync frames go
    /// to the sender's *other* devices).
    pub async fn deliver_except(&self, user: Uuid, skip_device: Uuid, frame: &Frame) -> usize {
        let connections = self.connections.read().await;
        let Some(devices) = connections.get(&user) else {
            return 0;
        };
        devices
            .values()
            .filter(|h| h.device_id != skip_device)
            .map(|h| h.push(frame.clone()) as usize)
            .sum()
    }

    pub async fn is_local(&self, user: Uuid) -> bool {
        self.connections.read().await.contains_key(&user)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .map(|devices| devices.len())
            .sum()
    }

    /// Close all of one user's local connections (account deletion).
    pub async fn close_user(&self, user: Uuid, reason: CloseReason) {
        let connections = self.connections.read().await;
        if let Some(devices) = connections.get(&user) {
            for handle in devices.values() {
                handle.close(reason);
            }
        }
    }

    /// Close one device's local connection (device removal).
    pub async fn close_device(&self, user: Uuid, device: Uuid, reason: CloseReason) {
        let connections = self.connections.read().await;
        if let Some(handle) = connections.get(&user).and_then(|d| d.get(&device)) {
            handle.close(reason);
        }
    }

    /// Close every connection (graceful shutdown).
    pub async fn close_all(&self, reason: CloseReason) {
        let connections = self.connections.read().await;
        for devices in connections.values() {
            for handle in devices.values() {
                handle.close(reason);
            }
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn handle(device: Uuid, capacity: usize) -> (ConnHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (kill, _) = watch::channel(None);
        (ConnHandle::new(Uuid::now_v7(), device, tx, kill), rx)
    }

    #[tokio::test]
    async fn first_and_last_connection_are_reported() {
        let hub = Hub::new();
        let user = Uuid::now_v7();
        let (h1, _rx1) = handle(Uuid::now_v7(), 4);
        let (h2, _rx2) = handle(Uuid::now_v7(), 4);
        let (d1, c1) = (h1.device_id, h1.connection_id);
        let (d2, c2) = (h2.device_id, h2.connection_id);

        assert!(hub.register(user, h1).await);
        assert!(!hub.register(user, h2).await);

        assert!(!hub.unregister(user, d1, c1).await);
        assert!(hub.unregister(user, d2, c2).await);
        assert!(!hub.is_local(user).await);
    }

    #[tokio::test]
    async fn deliver_fans_out_to_all_devices() {
        let hub = Hub::new();
        let user = Uuid::now_v7();
        let (h1, mut rx1) = handle(Uuid::now_v7(), 4);
        let (h2, mut rx2) = handle(Uuid::now_v7(), 4);
        hub.register(user, h1).await;
        hub.register(user, h2).await;

        let delivered = hub
            .deliver(user, None, &Frame::new(hush_common::frame::FrameKind::Ping, Value::Null))
            .await;
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_outbound_queue_kills_the_connection() {
        let hub = Hub::new();
        let user = Uuid::now_v7();
        let (h, _rx) = handle(Uuid::now_v7(), 1);
        let kill_rx = h.kill.subscribe();
        hub.register(user, h).await;

        let ping = Frame::new(hush_common::frame::FrameKind::Ping, Value::Null);
        assert_eq!(hub.deliver(user, None, &ping).await, 1);
        // Second push overflows the capacity-1 channel.
        assert_eq!(hub.deliver(user, None, &ping).await, 0);
        assert_eq!(*kill_rx.borrow(), Some(CloseReason::SlowConsumer));
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_replacement() {
        let hub = Hub::new();
        let user = Uuid::now_v7();
        let device = Uuid::now_v7();
        let (old, _rx_old) = handle(device, 4);
        let old_id = old.connection_id;
        let (new, _rx_new) = handle(device, 4);
        hub.register(user, old).await;
        hub.register(user, new).await;

        // The replaced connection's cleanup must not remove the new one.
        assert!(!hub.unregister(user, device, old_id).await);
        assert!(hub.is_local(user).await);
    }
}
