//! Conversation and message handlers
//!
//! The REST surface over the store and the dispatcher. POST /api/message is
//! the HTTP variant of the realtime send and goes through the same
//! Delivery Dispatcher, so both paths share one contract.

use crate::config::AppState;
use crate::delivery::{SendReceipt, SendRequest, NEW_CONVERSATION};
use crate::error::{Error, Result};
use crate::models::{Conversation, Message, UserProfile};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub sender_id: String,
    pub receiver_id: String,
}

/// Conversation enriched with the counterpart's profile for listings
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub counterpart: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: Option<String>,
    pub message: String,
    pub conversation_id: String,
}

/// Message enriched with its sender's profile for history reads
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub receiver_id: Option<String>,
}

/// POST /api/conversation
///
/// Explicit creation; both members must already exist. The implicit path
/// (sending with conversationId "new") does not run this existence check.
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>> {
    info!("POST /api/conversation - {} <-> {}", req.sender_id, req.receiver_id);

    if req.sender_id == req.receiver_id {
        return Err(Error::BadRequest(
            "A conversation needs two distinct members".to_string(),
        ));
    }
    for member in [&req.sender_id, &req.receiver_id] {
        if state.directory.profile_by_id(member).await?.is_none() {
            warn!("Conversation create rejected: unknown member {}", member);
            return Err(Error::BadRequest(format!("Unknown user: {}", member)));
        }
    }

    let conversation = state
        .store
        .create_conversation(&req.sender_id, &req.receiver_id)
        .await?;
    Ok(Json(conversation))
}

/// GET /api/conversation/{user_id}
pub async fn list_conversations(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationView>>> {
    info!("GET /api/conversation/{}", user_id);

    let conversations = state.store.conversations_by_member(&user_id).await?;

    let mut views = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        let counterpart_id = if conversation.members[0] == user_id {
            &conversation.members[1]
        } else {
            &conversation.members[0]
        };
        let counterpart = state.directory.profile_by_id(counterpart_id).await?;
        views.push(ConversationView {
            conversation,
            counterpart,
        });
    }

    Ok(Json(views))
}

/// POST /api/message
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendReceipt>> {
    info!(
        "POST /api/message - {} -> conversation {}",
        req.sender_id, req.conversation_id
    );

    let request = SendRequest {
        sender_id: req.sender_id,
        receiver_id: req.receiver_id,
        text: req.message,
        conversation_id: req.conversation_id,
    };

    match state.dispatcher.send_message(request).await {
        Ok(receipt) => Ok(Json(receipt)),
        Err(e) => {
            warn!("Send failed: {}", e);
            Err(e.into())
        }
    }
}

/// GET /api/message/{conversation_id}
///
/// History read. A conversation_id of "new" plus senderId/receiverId query
/// params resolves the pair's conversation first; no match means no history
/// yet, which is an empty list rather than an error.
pub async fn list_messages(
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<MessageView>>> {
    info!("GET /api/message/{}", conversation_id);

    let conversation_id = if conversation_id == NEW_CONVERSATION {
        let (sender_id, receiver_id) = match (&query.sender_id, &query.receiver_id) {
            (Some(sender_id), Some(receiver_id)) => (sender_id, receiver_id),
            _ => {
                return Err(Error::BadRequest(
                    "Resolving a new conversation requires senderId and receiverId".to_string(),
                ))
            }
        };
        match state.store.find_conversation(sender_id, receiver_id).await? {
            Some(conversation) => conversation.id,
            None => return Ok(Json(Vec::new())),
        }
    } else {
        conversation_id
    };

    let messages = state.store.messages_by_conversation(&conversation_id).await?;

    let mut views = Vec::with_capacity(messages.len());
    for message in messages {
        let user = state.directory.profile_by_id(&message.sender_id).await?;
        views.push(MessageView { message, user });
    }

    Ok(Json(views))
}
