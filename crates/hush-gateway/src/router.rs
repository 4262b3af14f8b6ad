//! Message router.
//!
//! The decision core: given an inbound frame, deliver now via the hub,
//! publish on the bus, park in the offline queue, or refuse. Assigns ids,
//! persists ciphertext, and emits receipts along the reverse path.

use std::sync::Arc;

use uuid::Uuid;

use hush_common::error::{HushError, HushResult};
use hush_common::frame::{BusEnvelope, DeliverPayload, Frame, FrameKind, SendPayload};
use hush_common::ids;
use hush_common::models::conversation::{Conversation, ConversationKind, ConversationStatus};
use hush_common::models::message::DeliveryStatus;
use hush_db::Database;
use hush_db::counter_store::CounterStore;
use hush_db::offline_queue::OfflineQueue;
use hush_db::repository::{conversations, messages, users};

use crate::bus::Bus;
use crate::hub::Hub;

/// How long a client nonce pins its message id.
const NONCE_TTL_SECS: u64 = 24 * 60 * 60;

/// Where a frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Written to at least one local connection.
    Local(usize),
    /// Published on the cross-instance bus.
    Bused,
    /// Parked in the offline queue.
    Queued,
    /// Transient frame for an offline user; dropped by design.
    Dropped,
}

pub struct MessageRouter {
    db: Database,
    hub: Arc<Hub>,
    bus: Bus,
    queue: OfflineQueue,
    store: CounterStore,
}

impl MessageRouter {
    pub fn new(
        db: Database,
        hub: Arc<Hub>,
        bus: Bus,
        queue: OfflineQueue,
        store: CounterStore,
    ) -> Self {
        Self {
            db,
            hub,
            bus,
            queue,
            store,
        }
    }

    // ============================================================
    // send
    // ============================================================

    /// Full send pipeline: authorize → assign → persist → ack → fan out.
    /// Returns the `sent_ack` frame for the sender's connection.
    pub async fn handle_send(
        &self,
        sender: Uuid,
        sender_device: Uuid,
        payload: SendPayload,
    ) -> HushResult<Frame> {
        if payload.ciphertext.is_empty() {
            return Err(HushError::InvalidInput {
                message: "ciphertext must not be empty".into(),
            });
        }

        let message_id = ids::generate_id();

        // Idempotency: a replayed nonce returns the original ack without
        // re-fanning out.
        let nonce = payload.nonce.clone();
        if let Some(nonce) = &nonce {
            if let Some(original) = self
                .store
                .claim_nonce(sender_device, nonce, message_id, NONCE_TTL_SECS)
                .await?
            {
                tracing::debug!(nonce = %nonce, message = %original, "Duplicate send, replaying ack");
                return Ok(sent_ack(original));
            }
        }

        let result = self
            .send_pipeline(sender, sender_device, message_id, payload)
            .await;

        // A refused send must not leave its nonce claimed, or the retry
        // would be answered with an ack for a message that never existed.
        if result.is_err() {
            if let Some(nonce) = &nonce {
                if let Err(e) = self.store.release_nonce(sender_device, nonce).await {
                    tracing::warn!(nonce = %nonce, "Failed to release nonce: {e}");
                }
            }
        }
        result
    }

    async fn send_pipeline(
        &self,
        sender: Uuid,
        sender_device: Uuid,
        message_id: Uuid,
        payload: SendPayload,
    ) -> HushResult<Frame> {
        let (conversation, targets) = match (payload.receiver_id, payload.group_id) {
            (Some(receiver), None) => {
                let conversation = self.resolve_direct(sender, receiver).await?;
                (conversation, vec![receiver])
            }
            (None, Some(group)) => {
                let conversation = conversations::find(&self.db.pool, group)
                    .await?
                    .filter(|c| c.kind == ConversationKind::Group)
                    .ok_or(HushError::NotFound {
                        resource: "Group".into(),
                    })?;
                if !conversations::is_member(&self.db.pool, conversation.id, sender).await? {
                    return Err(HushError::Forbidden);
                }
                // Membership snapshot at persist time: later joins/leaves
                // don't alter this send's fan-out.
                let members = conversations::members(&self.db.pool, conversation.id)
                    .await?
                    .into_iter()
                    .filter(|&m| m != sender)
                    .collect();
                (conversation, members)
            }
            _ => {
                return Err(HushError::InvalidInput {
                    message: "Exactly one of receiver_id or group_id is required".into(),
                });
            }
        };

        let pending = conversation.status == ConversationStatus::Pending;
        let recipient_id = payload.receiver_id;

        let message = messages::insert(
            &self.db.pool,
            message_id,
            conversation.id,
            sender,
            sender_device,
            recipient_id,
            &payload.ciphertext,
            payload.kind,
            payload.media_id,
        )
        .await?;

        let deliver = Frame::new(
            FrameKind::Deliver,
            serde_json::to_value(DeliverPayload {
                conversation_id: conversation.id,
                ciphertext: payload.ciphertext.clone(),
                kind: payload.kind,
                media_id: payload.media_id,
                pending,
            })
            .unwrap_or_default(),
        )
        .with_message_id(message.id)
        .with_sender(sender);

        let mut any_local = false;
        for target in targets {
            match self.dispatch(target, None, deliver.clone(), true).await {
                Dispatch::Local(_) => any_local = true,
                Dispatch::Bused | Dispatch::Queued | Dispatch::Dropped => {}
            }
        }

        if any_local {
            self.finalize_delivery(message.id).await?;
        }

        Ok(sent_ack(message.id))
    }

    async fn resolve_direct(&self, sender: Uuid, receiver: Uuid) -> HushResult<Conversation> {
        if sender == receiver {
            return Err(HushError::InvalidInput {
                message: "Cannot message yourself".into(),
            });
        }
        if users::find_by_id(&self.db.pool, receiver).await?.is_none() {
            return Err(HushError::NotFound {
                resource: "Recipient".into(),
            });
        }

        match conversations::find_direct(&self.db.pool, sender, receiver).await? {
            Some(conversation) if conversation.status == ConversationStatus::Blocked => {
                Err(HushError::Forbidden)
            }
            Some(conversation)
                if conversation.status == ConversationStatus::Pending
                    && conversation.created_by != sender =>
            {
                // The recipient of a request replying in it is acceptance.
                conversations::set_status(
                    &self.db.pool,
                    conversation.id,
                    ConversationStatus::Accepted,
                    None,
                )
                .await?;
                Ok(Conversation {
                    status: ConversationStatus::Accepted,
                    ..conversation
                })
            }
            Some(conversation) => Ok(conversation),
            None => {
                // Unknown sender: the conversation starts as a request.
                Ok(
                    conversations::create_direct(
                        &self.db.pool,
                        sender,
                        receiver,
                        ConversationStatus::Pending,
                    )
                    .await?,
                )
            }
        }
    }

    // ============================================================
    // receipts
    // ============================================================

    /// A recipient acked a live or drained delivery.
    pub async fn handle_delivery_ack(&self, from: Uuid, message_id: Uuid) -> HushResult<()> {
        let Some(message) = messages::find(&self.db.pool, message_id).await? else {
            return Ok(());
        };
        if !self.may_receipt(&message, from).await? {
            return Ok(());
        }
        self.finalize_delivery(message_id).await
    }

    /// A recipient read the message. Never records `read` without a
    /// persisted `delivered` first; suppressed for pending conversations.
    pub async fn handle_read_receipt(&self, from: Uuid, message_id: Uuid) -> HushResult<()> {
        let Some(message) = messages::find(&self.db.pool, message_id).await? else {
            return Ok(());
        };
        if !self.may_receipt(&message, from).await? {
            return Ok(());
        }
        let Some(conversation) =
            conversations::find(&self.db.pool, message.conversation_id).await?
        else {
            return Ok(());
        };
        if !conversation.realtime_enabled() {
            tracing::debug!(message = %message_id, "Read receipt suppressed for pending conversation");
            return Ok(());
        }

        if message.status == DeliveryStatus::Sent {
            self.finalize_delivery(message_id).await?;
        }
        if messages::mark_read(&self.db.pool, message_id).await? {
            self.notify_status(message.sender_id, message_id, DeliveryStatus::Read)
                .await;
        }
        Ok(())
    }

    async fn may_receipt(
        &self,
        message: &hush_common::models::message::Message,
        from: Uuid,
    ) -> HushResult<bool> {
        if from == message.sender_id {
            return Ok(false);
        }
        if let Some(recipient) = message.recipient_id {
            return Ok(from == recipient);
        }
        Ok(conversations::is_member(&self.db.pool, message.conversation_id, from).await?)
    }

    /// sent → delivered plus the sender-side `status_update`.
    async fn finalize_delivery(&self, message_id: Uuid) -> HushResult<()> {
        if messages::mark_delivered(&self.db.pool, message_id).await? {
            if let Some(message) = messages::find(&self.db.pool, message_id).await? {
                self.notify_status(message.sender_id, message_id, DeliveryStatus::Delivered)
                    .await;
            }
        }
        Ok(())
    }

    async fn notify_status(&self, sender: Uuid, message_id: Uuid, status: DeliveryStatus) {
        let frame = Frame::status_update(message_id, status.as_str());
        let _ = self.dispatch(sender, None, frame, true).await;
    }

    // ============================================================
    // passthrough
    // ============================================================

    /// Relay an opaque realtime frame (typing, media_key, call signaling,
    /// ICE) to the user named by `payload.receiver_id`. Transient: offline
    /// targets just miss it.
    pub async fn relay(&self, sender: Uuid, frame: Frame) -> HushResult<()> {
        let receiver = frame
            .payload
            .get("receiver_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or(HushError::InvalidInput {
                message: "receiver_id is required".into(),
            })?;

        if conversations::is_blocked_by(&self.db.pool, sender, receiver).await? {
            return Err(HushError::Forbidden);
        }
        if frame.kind == FrameKind::Typing {
            // Typing indicators only flow in accepted conversations.
            let accepted = conversations::find_direct(&self.db.pool, sender, receiver)
                .await?
                .is_some_and(|c| c.realtime_enabled());
            if !accepted {
                return Ok(());
            }
        }

        let outbound = frame.with_sender(sender);
        let _ = self.dispatch(receiver, None, outbound, false).await;
        Ok(())
    }

    /// Relay a sync frame to the sender's *other* devices, here and on
    /// other instances.
    pub async fn relay_to_own_devices(
        &self,
        user: Uuid,
        sender_device: Uuid,
        frame: Frame,
    ) -> HushResult<()> {
        let outbound = frame.with_sender(user);
        self.hub.deliver_except(user, sender_device, &outbound).await;
        if let Err(e) = self.bus.publish(user, None, outbound).await {
            tracing::warn!(user = %user, "Sync relay bus publish failed: {e}");
        }
        Ok(())
    }

    // ============================================================
    // dispatch core
    // ============================================================

    /// Deliver now, bus to the instance that has the user, or park in the
    /// offline queue — in that order.
    pub async fn dispatch(
        &self,
        user: Uuid,
        device: Option<Uuid>,
        frame: Frame,
        durable: bool,
    ) -> Dispatch {
        let delivered = self.hub.deliver(user, device, &frame).await;
        if delivered > 0 {
            return Dispatch::Local(delivered);
        }

        // Online on another instance? The bus forwards; otherwise the
        // offline queue is the durable path.
        let online_elsewhere = matches!(
            self.store.presence_get(user).await,
            Ok(Some(ref value)) if value == crate::presence::ONLINE
        );

        if online_elsewhere {
            match self.bus.publish(user, device, frame.clone()).await {
                Ok(()) => return Dispatch::Bused,
                Err(e) => {
                    tracing::warn!(user = %user, "Bus publish failed, falling back: {e}");
                }
            }
        }

        if durable {
            if let Err(e) = self.queue.enqueue(user, frame).await {
                tracing::error!(user = %user, "Offline enqueue failed: {e}");
            }
            Dispatch::Queued
        } else {
            Dispatch::Dropped
        }
    }

    /// Inbound envelope from another instance. Writing the frame to a local
    /// connection is the moment a routed message counts as delivered.
    pub async fn handle_bus_frame(&self, envelope: BusEnvelope) {
        let BusEnvelope {
            target_user,
            target_device,
            frame,
            ..
        } = envelope;

        let delivered = self.hub.deliver(target_user, target_device, &frame).await;
        if delivered == 0 {
            // At-most-once on the bus: the user left between the presence
            // read and now. The message row stays `sent`; history backfill
            // covers the client.
            tracing::debug!(user = %target_user, "Bus frame arrived for a user no longer here");
            return;
        }

        if frame.kind == FrameKind::Deliver {
            if let Some(message_id) = frame.message_id {
                if let Err(e) = self.finalize_delivery(message_id).await {
                    tracing::error!(message = %message_id, "Failed to finalize bus delivery: {e}");
                }
            }
        }
    }
}

fn sent_ack(message_id: Uuid) -> Frame {
    Frame::new(
        FrameKind::SentAck,
        serde_json::json!({ "message_id": message_id }),
    )
    .with_message_id(message_id)
}
