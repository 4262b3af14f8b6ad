//! Cross-instance bus — Redis pub/sub.
//!
//! Topics are `user:<user_id>`. An instance subscribes to a user's topic
//! while it holds at least one local connection for them, and unsubscribes
//! when the last one closes. Envelopes carry the publishing `server_id`,
//! so an instance never re-processes its own publish. Delivery on the bus
//! is at-most-once; durability for offline recipients belongs to the
//! offline queue, not here.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::mpsc;
use uuid::Uuid;

use futures_util::StreamExt;
use hush_common::frame::{BusEnvelope, Frame};

fn topic(user: Uuid) -> String {
    format!("user:{user}")
}

enum Subscription {
    Subscribe(Uuid),
    Unsubscribe(Uuid),
}

/// Cloneable bus handle: publish + subscription control.
#[derive(Clone)]
pub struct Bus {
    server_id: String,
    publish_conn: ConnectionManager,
    subscriptions: mpsc::UnboundedSender<Subscription>,
}

impl Bus {
    /// Spin up the bus: a subscription-control task feeding the pub/sub
    /// sink and a stream task forwarding inbound envelopes. Envelopes from
    /// other instances arrive on the returned receiver.
    pub async fn start(
        client: redis::Client,
        publish_conn: ConnectionManager,
        server_id: String,
    ) -> anyhow::Result<(Self, mpsc::Receiver<BusEnvelope>)> {
        let pubsub = client.get_async_pubsub().await?;
        let (mut sink, mut stream) = pubsub.split();

        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel::<Subscription>();
        let (envelope_tx, envelope_rx) = mpsc::channel::<BusEnvelope>(1024);

        // Subscription control: serialize subscribe/unsubscribe onto the
        // pub/sub sink.
        tokio::spawn(async move {
            while let Some(command) = sub_rx.recv().await {
                let result = match command {
                    Subscription::Subscribe(user) => sink.subscribe(topic(user)).await,
                    Subscription::Unsubscribe(user) => sink.unsubscribe(topic(user)).await,
                };
                if let Err(e) = result {
                    tracing::error!("Bus subscription command failed: {e}");
                }
            }
        });

        // Inbound stream: decode envelopes, drop our own publishes.
        let own_id = server_id.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("Undecodable bus payload: {e}");
                        continue;
                    }
                };
                let envelope: BusEnvelope = match serde_json::from_str(&payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!("Malformed bus envelope: {e}");
                        continue;
                    }
                };
                if envelope.server_id == own_id {
                    continue;
                }
                if envelope_tx.send(envelope).await.is_err() {
                    break;
                }
            }
            tracing::warn!("Bus inbound stream ended");
        });

        Ok((
            Self {
                server_id,
                publish_conn,
                subscriptions: sub_tx,
            },
            envelope_rx,
        ))
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn subscribe(&self, user: Uuid) {
        let _ = self.subscriptions.send(Subscription::Subscribe(user));
    }

    pub fn unsubscribe(&self, user: Uuid) {
        let _ = self.subscriptions.send(Subscription::Unsubscribe(user));
    }

    /// Publish a frame addressed to a user (optionally one device).
    /// At-most-once: a publish with no subscriber anywhere is simply gone.
    pub async fn publish(
        &self,
        target_user: Uuid,
        target_device: Option<Uuid>,
        frame: Frame,
    ) -> Result<(), redis::RedisError> {
        let envelope = BusEnvelope {
            server_id: self.server_id.clone(),
            target_user,
            target_device,
            frame,
        };
        let payload = serde_json::to_string(&envelope).unwrap_or_default();
        let mut conn = self.publish_conn.clone();
        let _: () = conn.publish(topic(target_user), payload).await?;
        Ok(())
    }
}
