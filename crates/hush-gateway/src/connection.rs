//! Per-connection lifecycle.
//!
//! One reader (this module's main loop) and one writer task per
//! connection, joined by a bounded channel — nothing else ever touches the
//! socket. The connection walks
//! connected → authenticated → active ↔ idle → closing → closed;
//! authentication already happened at upgrade, so the handoff lands here
//! in `authenticated`.
//!
//! A fresh connection drains its offline queue (FIFO, ack-gated) before it
//! registers for live fan-out; while the drain runs, new traffic keeps
//! landing in the queue and is picked up by the re-peek loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify, mpsc, watch};
use uuid::Uuid;

use hush_common::error::HushError;
use hush_common::frame::{Frame, FrameKind, ReceiptPayload, SendPayload};

use crate::hub::{CloseReason, ConnHandle};
use crate::GatewayState;

/// Connection state machine. Mostly bookkeeping — transitions are logged,
/// closing is enforced through the kill channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnPhase {
    Authenticated,
    Active,
    Idle,
    Closing,
    Closed,
}

/// Frames drained from the offline queue, keyed by message id, awaiting
/// the client's delivery_ack.
type DrainMap = Arc<Mutex<HashMap<Uuid, String>>>;

pub(crate) struct ConnectionParams {
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub connection_id: Uuid,
    pub ip: String,
}

pub(crate) async fn run(socket: WebSocket, state: Arc<GatewayState>, params: ConnectionParams) {
    let ConnectionParams {
        user_id,
        device_id,
        connection_id,
        ip,
    } = params;

    let (socket_tx, socket_rx) = socket.split();

    let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(state.limits.outbound_buffer_frames);
    let (kill_tx, kill_rx) = watch::channel::<Option<CloseReason>>(None);

    let last_pong = Arc::new(Mutex::new(Instant::now()));
    let phase = Arc::new(Mutex::new(ConnPhase::Authenticated));

    tracing::info!(
        connection = %connection_id,
        user = %user_id,
        device = %device_id,
        ip = %ip,
        "Connection authenticated"
    );

    let writer = tokio::spawn(writer_loop(
        socket_tx,
        outbound_rx,
        kill_rx,
        Arc::clone(&last_pong),
        state.limits.heartbeat_interval_secs,
        connection_id,
    ));

    // Offline drain, then live registration.
    let drain_map: DrainMap = Arc::new(Mutex::new(HashMap::new()));
    let drain_done = Arc::new(Notify::new());
    let registered = Arc::new(AtomicBool::new(false));

    let activation = tokio::spawn(activate(
        Arc::clone(&state),
        user_id,
        device_id,
        connection_id,
        outbound_tx.clone(),
        kill_tx.clone(),
        Arc::clone(&drain_map),
        Arc::clone(&drain_done),
        Arc::clone(&registered),
    ));

    // Reader loop — the only consumer of the socket's read half. Its own
    // task, so a panic in frame handling is caught here and teardown still
    // runs instead of leaking the hub entry.
    let reader = tokio::spawn(read_loop(
        socket_rx,
        Arc::clone(&state),
        user_id,
        device_id,
        connection_id,
        outbound_tx.clone(),
        Arc::clone(&last_pong),
        Arc::clone(&drain_map),
        Arc::clone(&drain_done),
        Arc::clone(&phase),
    ));
    if let Err(e) = reader.await {
        if e.is_panic() {
            tracing::error!(connection = %connection_id, "Connection handler panicked: {e}");
            let _ = outbound_tx
                .send(Frame::error("server_error", "internal error", None))
                .await;
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────
    *phase.lock().await = ConnPhase::Closing;
    activation.abort();
    let _ = kill_tx.send(Some(CloseReason::ServerShutdown));
    writer.abort();

    if registered.load(Ordering::SeqCst) {
        let last_local = state.hub.unregister(user_id, device_id, connection_id).await;
        if last_local {
            state.bus.unsubscribe(user_id);
        }
        match state.store.presence_disconnect(user_id).await {
            Ok(0) => {
                if let Err(e) = state.presence.mark_offline(user_id).await {
                    tracing::error!(user = %user_id, "Failed to mark offline: {e}");
                }
                notify_contacts(&state, user_id, FrameKind::UserOffline).await;
            }
            Ok(_) => {}
            Err(e) => tracing::error!(user = %user_id, "Presence disconnect failed: {e}"),
        }
    }

    let _ = hush_db::repository::devices::touch_last_seen(&state.db.pool, device_id).await;

    *phase.lock().await = ConnPhase::Closed;
    tracing::info!(connection = %connection_id, user = %user_id, "Connection closed");
}

// ============================================================
// Writer
// ============================================================

/// Single writer: outbound frames, heartbeats, kill handling. Frame order
/// to the socket is exactly the channel order.
async fn writer_loop(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    mut kill_rx: watch::Receiver<Option<CloseReason>>,
    last_pong: Arc<Mutex<Instant>>,
    heartbeat_secs: u64,
    connection_id: Uuid,
) {
    let heartbeat = Duration::from_secs(heartbeat_secs);
    let mut ping_timer = tokio::time::interval(heartbeat);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_timer.tick().await; // immediate first tick

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                if send_frame(&mut socket_tx, &frame).await.is_err() {
                    break;
                }
            }
            _ = ping_timer.tick() => {
                // Two consecutive missed intervals close the connection.
                if last_pong.lock().await.elapsed() > heartbeat * 2 {
                    tracing::info!(connection = %connection_id, "Heartbeat timeout");
                    let _ = socket_tx.close().await;
                    break;
                }
                if send_frame(&mut socket_tx, &Frame::ping()).await.is_err() {
                    break;
                }
            }
            _ = kill_rx.changed() => {
                let reason = *kill_rx.borrow();
                if let Some(reason) = reason {
                    tracing::info!(connection = %connection_id, reason = reason.as_str(), "Closing connection");
                    let _ = send_frame(
                        &mut socket_tx,
                        &Frame::error("connection_closed", reason.as_str(), None),
                    )
                    .await;
                    let _ = socket_tx.close().await;
                    break;
                }
            }
        }
    }
}

async fn send_frame(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    frame: &Frame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    socket_tx.send(Message::Text(text.into())).await
}

// ============================================================
// Activation: drain, then register
// ============================================================

#[allow(clippy::too_many_arguments)]
async fn activate(
    state: Arc<GatewayState>,
    user_id: Uuid,
    device_id: Uuid,
    connection_id: Uuid,
    outbound_tx: mpsc::Sender<Frame>,
    kill_tx: watch::Sender<Option<CloseReason>>,
    drain_map: DrainMap,
    drain_done: Arc<Notify>,
    registered: Arc<AtomicBool>,
) {
    if let Err(e) = drain_offline(
        &state,
        user_id,
        &outbound_tx,
        &drain_map,
        &drain_done,
    )
    .await
    {
        tracing::error!(user = %user_id, "Offline drain failed: {e}");
    }

    // Now eligible for live fan-out.
    let handle = ConnHandle::new(connection_id, device_id, outbound_tx, kill_tx);
    let first_local = state.hub.register(user_id, handle).await;
    if first_local {
        state.bus.subscribe(user_id);
    }
    registered.store(true, Ordering::SeqCst);

    match state.store.presence_connect(user_id).await {
        Ok(1) => {
            // First connection anywhere: the user just came online.
            if let Err(e) = state.presence.mark_online(user_id).await {
                tracing::error!(user = %user_id, "Failed to mark online: {e}");
            }
            notify_contacts(&state, user_id, FrameKind::UserOnline).await;
        }
        Ok(_) => {
            if let Err(e) = state.presence.mark_online(user_id).await {
                tracing::error!(user = %user_id, "Failed to refresh online flag: {e}");
            }
        }
        Err(e) => tracing::error!(user = %user_id, "Presence connect failed: {e}"),
    }
}

/// FIFO drain of the offline queue. Each frame is re-emitted to the client
/// and removed only on its delivery_ack (handled by the reader); frames
/// still un-acked when the timeout lapses stay queued for the next
/// connection.
async fn drain_offline(
    state: &GatewayState,
    user_id: Uuid,
    outbound_tx: &mpsc::Sender<Frame>,
    drain_map: &DrainMap,
    drain_done: &Notify,
) -> Result<(), HushError> {
    if state.queue.take_truncated(user_id).await? {
        let _ = outbound_tx
            .send(Frame::error(
                "queue_truncated",
                "Offline queue overflowed; backfill via message history",
                None,
            ))
            .await;
    }

    let deadline = Instant::now() + Duration::from_secs(state.limits.drain_ack_timeout_secs);

    loop {
        let entries = state.queue.peek_all(user_id).await?;
        if entries.is_empty() {
            break;
        }
        let batch: Vec<Uuid> = {
            let mut map = drain_map.lock().await;
            let mut ids = Vec::with_capacity(entries.len());
            for (raw, entry) in &entries {
                let key = entry.frame.message_id.unwrap_or(entry.id);
                map.insert(key, raw.clone());
                ids.push(key);
            }
            ids
        };
        tracing::debug!(user = %user_id, frames = batch.len(), "Draining offline queue");

        for (_, entry) in entries {
            if outbound_tx.send(entry.frame).await.is_err() {
                return Ok(()); // connection died mid-drain; queue keeps the rest
            }
        }

        // Wait for the reader to ack the batch away.
        loop {
            if drain_map.lock().await.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                let left = drain_map.lock().await.len();
                tracing::warn!(user = %user_id, unacked = left, "Drain ack timeout; leaving frames queued");
                drain_map.lock().await.clear();
                return Ok(());
            }
            tokio::select! {
                _ = drain_done.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }
    Ok(())
}

// ============================================================
// Reader
// ============================================================

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    mut socket_rx: SplitStream<WebSocket>,
    state: Arc<GatewayState>,
    user_id: Uuid,
    device_id: Uuid,
    connection_id: Uuid,
    outbound_tx: mpsc::Sender<Frame>,
    last_pong: Arc<Mutex<Instant>>,
    drain_map: DrainMap,
    drain_done: Arc<Notify>,
    phase: Arc<Mutex<ConnPhase>>,
) {
    // The hub's own per-connection frame budget; the HTTP limiter does not
    // cover the persistent channel.
    let mut window_start = Instant::now();
    let mut frames_in_window: u32 = 0;
    let idle_after = Duration::from_secs(state.limits.idle_after_secs);

    loop {
        let message = tokio::select! {
            message = socket_rx.next() => message,
            _ = tokio::time::sleep(idle_after) => {
                let mut p = phase.lock().await;
                if *p == ConnPhase::Active {
                    tracing::debug!(connection = %connection_id, "Connection idle");
                    *p = ConnPhase::Idle;
                }
                continue;
            }
        };

        let Some(Ok(message)) = message else { break };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
        };

        {
            let mut p = phase.lock().await;
            if matches!(*p, ConnPhase::Authenticated | ConnPhase::Idle) {
                *p = ConnPhase::Active;
            }
        }

        // Frame rate cap.
        if window_start.elapsed() >= Duration::from_secs(60) {
            window_start = Instant::now();
            frames_in_window = 0;
        }
        frames_in_window += 1;
        if frames_in_window > state.limits.frames_per_minute {
            let retry = 60u64.saturating_sub(window_start.elapsed().as_secs());
            let _ = outbound_tx
                .send(Frame::error("rate_limited", "Frame rate exceeded", Some(retry)))
                .await;
            continue;
        }

        let frame: Frame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(_) => {
                let _ = outbound_tx
                    .send(Frame::error("invalid_message", "Unknown or malformed frame", None))
                    .await;
                continue;
            }
        };

        if !frame.kind.client_origin() {
            let _ = outbound_tx
                .send(Frame::error("invalid_message", "Server-origin frame tag", None))
                .await;
            continue;
        }

        handle_client_frame(
            &state,
            user_id,
            device_id,
            frame,
            &outbound_tx,
            &last_pong,
            &drain_map,
            &drain_done,
        )
        .await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_frame(
    state: &Arc<GatewayState>,
    user_id: Uuid,
    device_id: Uuid,
    frame: Frame,
    outbound_tx: &mpsc::Sender<Frame>,
    last_pong: &Arc<Mutex<Instant>>,
    drain_map: &DrainMap,
    drain_done: &Arc<Notify>,
) {
    let result: Result<Option<Frame>, HushError> = match frame.kind {
        FrameKind::Pong => {
            *last_pong.lock().await = Instant::now();
            Ok(None)
        }
        FrameKind::Heartbeat => {
            *last_pong.lock().await = Instant::now();
            Ok(Some(Frame::heartbeat_ack()))
        }
        FrameKind::Send => match serde_json::from_value::<SendPayload>(frame.payload) {
            Ok(payload) => state
                .router
                .handle_send(user_id, device_id, payload)
                .await
                .map(Some),
            Err(_) => Err(HushError::InvalidInput {
                message: "Malformed send payload".into(),
            }),
        },
        FrameKind::DeliveryAck => match serde_json::from_value::<ReceiptPayload>(frame.payload) {
            Ok(receipt) => {
                // Queue-drained frame? Remove it from the queue first.
                let drained = drain_map.lock().await.remove(&receipt.message_id);
                if let Some(raw) = drained {
                    if let Err(e) = state.queue.ack(user_id, &raw).await {
                        tracing::error!(user = %user_id, "Queue ack failed: {e}");
                    }
                    drain_done.notify_waiters();
                }
                state
                    .router
                    .handle_delivery_ack(user_id, receipt.message_id)
                    .await
                    .map(|_| None)
            }
            Err(_) => Err(HushError::InvalidInput {
                message: "Malformed delivery_ack payload".into(),
            }),
        },
        FrameKind::ReadReceipt => match serde_json::from_value::<ReceiptPayload>(frame.payload) {
            Ok(receipt) => state
                .router
                .handle_read_receipt(user_id, receipt.message_id)
                .await
                .map(|_| None),
            Err(_) => Err(HushError::InvalidInput {
                message: "Malformed read_receipt payload".into(),
            }),
        },
        FrameKind::Typing
        | FrameKind::MediaKey
        | FrameKind::CallOffer
        | FrameKind::CallAnswer
        | FrameKind::CallReject
        | FrameKind::CallEnd
        | FrameKind::CallBusy
        | FrameKind::IceCandidate => state.router.relay(user_id, frame).await.map(|_| None),
        FrameKind::SyncRequest | FrameKind::SyncData | FrameKind::SyncAck => state
            .router
            .relay_to_own_devices(user_id, device_id, frame)
            .await
            .map(|_| None),
        // client_origin() filtered everything else already
        _ => Ok(None),
    };

    match result {
        Ok(Some(reply)) => {
            let _ = outbound_tx.send(reply).await;
        }
        Ok(None) => {}
        Err(e) => {
            let retry_after = match &e {
                HushError::RateLimited { reset_secs, .. } => Some(*reset_secs),
                HushError::AbuseBlocked { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            };
            let _ = outbound_tx
                .send(Frame::error(e.error_code(), &e.to_string(), retry_after))
                .await;
        }
    }
}

// ============================================================
// Presence fan-out
// ============================================================

/// Tell the user's contacts about an online/offline transition. Presence
/// frames are transient: contacts that are offline just miss them.
async fn notify_contacts(state: &Arc<GatewayState>, user_id: Uuid, kind: FrameKind) {
    let contacts = match state.presence.contacts_of(user_id).await {
        Ok(contacts) => contacts,
        Err(e) => {
            tracing::error!(user = %user_id, "Contact lookup failed: {e}");
            return;
        }
    };

    let frame = Frame::new(kind, serde_json::json!({ "user_id": user_id })).with_sender(user_id);
    for contact in contacts {
        let _ = state.router.dispatch(contact, None, frame.clone(), false).await;
    }
}
