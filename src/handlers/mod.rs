pub mod auth;
pub mod chat;

pub use auth::{list_users, login, register};
pub use chat::{create_conversation, list_conversations, list_messages, send_message};
