//! Message history and status routes.
//!
//! The realtime path owns delivery; HTTP covers paginated backfill and
//! out-of-band status mutation (a client that was offline marking what it
//! has now displayed).

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    routing::{get, put},
};
use serde::Serialize;
use uuid::Uuid;

use hush_common::{
    error::{HushError, HushResult},
    models::conversation::ConversationStatus,
    models::message::{DeliveryStatus, Message, MessageHistoryQuery, MessageStatusRequest},
};
use hush_db::repository::{conversations, messages};

use crate::{AppState, middleware::AuthContext};

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/messages", get(history))
        .route("/messages/{id}/status", put(update_status))
}

// ============================================================
// GET /messages?conversation_id=&before=&limit=
// ============================================================

#[derive(Serialize)]
struct HistoryResponse {
    conversation_id: Uuid,
    conversation_status: ConversationStatus,
    messages: Vec<Message>,
}

async fn history(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessageHistoryQuery>,
) -> HushResult<Json<HistoryResponse>> {
    let conversation = conversations::find(&state.db.pool, query.conversation_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "Conversation".into(),
        })?;
    if !conversations::is_member(&state.db.pool, conversation.id, auth.user_id).await? {
        return Err(HushError::Forbidden);
    }

    let limit = query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE) as i64;
    let page = messages::history(&state.db.pool, conversation.id, query.before, limit).await?;

    Ok(Json(HistoryResponse {
        conversation_id: conversation.id,
        conversation_status: conversation.status,
        messages: page,
    }))
}

// ============================================================
// PUT /messages/:id/status
// ============================================================

/// Status mutation over HTTP follows the same lattice the realtime
/// receipts do: sent → delivered → read, read implies a persisted
/// delivered, receipts suppressed for pending conversations.
async fn update_status(
    Extension(auth): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    Json(body): Json<MessageStatusRequest>,
) -> HushResult<Json<serde_json::Value>> {
    let message = messages::find(&state.db.pool, message_id)
        .await?
        .ok_or(HushError::NotFound {
            resource: "Message".into(),
        })?;
    if message.sender_id == auth.user_id {
        return Err(HushError::Forbidden);
    }
    let is_recipient = match message.recipient_id {
        Some(recipient) => recipient == auth.user_id,
        None => {
            conversations::is_member(&state.db.pool, message.conversation_id, auth.user_id)
                .await?
        }
    };
    if !is_recipient {
        return Err(HushError::Forbidden);
    }

    match body.status {
        DeliveryStatus::Delivered => {
            state
                .router
                .handle_delivery_ack(auth.user_id, message_id)
                .await?;
        }
        DeliveryStatus::Read => {
            state
                .router
                .handle_read_receipt(auth.user_id, message_id)
                .await?;
        }
        DeliveryStatus::Sent | DeliveryStatus::Failed => {
            return Err(HushError::InvalidInput {
                message: "Only delivered and read can be set by the recipient".into(),
            });
        }
    }

    let updated = messages::find(&state.db.pool, message_id).await?;
    Ok(Json(serde_json::json!({
        "message_id": message_id,
        "status": updated.map(|m| m.status),
    })))
}
