//! Delivery Dispatcher
//!
//! Decides which live handles receive a sent message and reconciles live
//! delivery with durable history. Persistence is the durability guarantee;
//! emission is best-effort and fire-and-forget, and peer receipt is never
//! acknowledged. Clients needing reliable delivery reconcile via the
//! history endpoints.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::directory::UserDirectory;
use crate::models::{Message, UserProfile};
use crate::presence::PresenceRegistry;
use crate::realtime::OutboundEvent;
use crate::store::MessageStore;

/// Sentinel conversation id signalling "create a conversation for this pair"
pub const NEW_CONVERSATION: &str = "new";

#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("profile not found: {0}")]
    ProfileNotFound(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl SendError {
    /// Machine-readable reason for the realtime `error` event
    pub fn reason(&self) -> &'static str {
        match self {
            SendError::InvalidRequest(_) => "invalid_request",
            SendError::ProfileNotFound(_) => "profile_not_found",
            SendError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendRequest {
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub text: String,
    pub conversation_id: String,
}

/// What the dispatcher can promise: the durable row plus how many live
/// emissions were issued
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message: Message,
    pub emissions: usize,
    pub receiver_online: bool,
}

pub struct DeliveryDispatcher {
    directory: Arc<UserDirectory>,
    store: Arc<MessageStore>,
    presence: Arc<PresenceRegistry>,
    store_timeout: Duration,
}

impl DeliveryDispatcher {
    pub fn new(
        directory: Arc<UserDirectory>,
        store: Arc<MessageStore>,
        presence: Arc<PresenceRegistry>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            store,
            presence,
            store_timeout,
        }
    }

    /// Route one send: validate, enrich with the sender's profile, persist,
    /// then emit to whichever of the two handles are live.
    pub async fn send_message(&self, request: SendRequest) -> Result<SendReceipt, SendError> {
        // Validation happens before any side effect
        if request.sender_id.trim().is_empty() {
            return Err(SendError::InvalidRequest("senderId is required".into()));
        }
        if request.text.trim().is_empty() {
            return Err(SendError::InvalidRequest("message is required".into()));
        }
        if request.conversation_id.trim().is_empty() {
            return Err(SendError::InvalidRequest(
                "conversationId is required".into(),
            ));
        }
        let receiver_id = request
            .receiver_id
            .as_deref()
            .filter(|id| !id.trim().is_empty());
        if request.conversation_id == NEW_CONVERSATION && receiver_id.is_none() {
            return Err(SendError::InvalidRequest(
                "a new conversation requires a receiverId".into(),
            ));
        }

        // Sender profile first; absence or a degraded directory skips
        // delivery but never persistence
        let profile = match timeout(
            self.store_timeout,
            self.directory.profile_by_id(&request.sender_id),
        )
        .await
        {
            Ok(Ok(profile)) => Ok(profile),
            Ok(Err(e)) => Err(format!("profile lookup failed: {}", e)),
            Err(_) => Err("profile lookup timed out".to_string()),
        };

        let conversation_id = match receiver_id {
            Some(receiver) if request.conversation_id == NEW_CONVERSATION => {
                let conversation = timeout(
                    self.store_timeout,
                    self.store.create_conversation(&request.sender_id, receiver),
                )
                .await
                .map_err(|_| {
                    SendError::StoreUnavailable("conversation create timed out".into())
                })?
                .map_err(|e| {
                    SendError::StoreUnavailable(format!("conversation create failed: {}", e))
                })?;
                conversation.id
            }
            _ => request.conversation_id.clone(),
        };

        let message = timeout(
            self.store_timeout,
            self.store
                .create_message(&conversation_id, &request.sender_id, &request.text),
        )
        .await
        .map_err(|_| SendError::StoreUnavailable("message write timed out".into()))?
        .map_err(|e| SendError::StoreUnavailable(format!("message write failed: {}", e)))?;

        let profile = match profile {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                warn!(
                    "[Delivery] No profile for sender {}; message {} persisted, delivery skipped",
                    request.sender_id, message.id
                );
                return Err(SendError::ProfileNotFound(format!(
                    "no profile for sender {}",
                    request.sender_id
                )));
            }
            Err(detail) => {
                warn!(
                    "[Delivery] {}; message {} persisted, delivery skipped",
                    detail, message.id
                );
                return Err(SendError::StoreUnavailable(detail));
            }
        };

        // Handles are copied out of the registry; emission happens with no
        // lock held
        let sender_handle = self.presence.lookup(&request.sender_id);
        let receiver_handle = receiver_id.and_then(|id| self.presence.lookup(id));
        let receiver_online = receiver_handle.is_some();

        let payload = self.delivery_payload(&request, &conversation_id, receiver_id, profile);

        // Dual delivery: the receiver gets the message and the sender gets a
        // server echo. With the receiver offline only the echo goes out; with
        // the sender's handle gone (dropped by a disconnect race), nothing
        // goes out at all, not even the receiver's copy.
        let mut emissions = 0;
        if let Some(sender_handle) = &sender_handle {
            if let Some(receiver_handle) = &receiver_handle {
                receiver_handle.emit(payload.clone());
                emissions += 1;
            }
            sender_handle.emit(payload);
            emissions += 1;
        }

        info!(
            "[Delivery] Message {} -> conversation {} ({} emission(s), receiver {})",
            message.id,
            conversation_id,
            emissions,
            if receiver_online { "online" } else { "offline" }
        );

        Ok(SendReceipt {
            message,
            emissions,
            receiver_online,
        })
    }

    fn delivery_payload(
        &self,
        request: &SendRequest,
        conversation_id: &str,
        receiver_id: Option<&str>,
        profile: UserProfile,
    ) -> OutboundEvent {
        OutboundEvent::MessageDelivered {
            sender_id: request.sender_id.clone(),
            message: request.text.clone(),
            conversation_id: conversation_id.to_string(),
            receiver_id: receiver_id.map(str::to_string),
            user: profile,
        }
    }
}
