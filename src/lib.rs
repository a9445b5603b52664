//! Duochat Server Library
//!
//! Realtime 1:1 chat: presence tracking, best-effort live delivery over
//! WebSockets, durable conversation history in SQLite.

pub mod config;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod realtime;
pub mod store;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{AppState, ServerConfig};
use delivery::DeliveryDispatcher;
use directory::UserDirectory;
use handlers::{
    // Conversations and messages
    create_conversation,
    list_conversations,
    list_messages,
    // Accounts
    list_users,
    login,
    register,
    send_message,
};
use presence::PresenceRegistry;
use realtime::{ws_upgrade, ConnectionSet};
use store::MessageStore;

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== Duochat Server ===");
    info!("Features: Accounts | Presence | Live Delivery | SQLite History");

    let config = ServerConfig::from_env();
    config.ensure_dirs().await?;

    info!("Data directory: {:?}", config.data_dir);
    info!("Database: {:?}", config.db_path());

    // Initialize User Directory
    let directory = Arc::new(UserDirectory::new(config.db_path()).await?);
    info!("User Directory initialized");

    // Initialize Conversation/Message Store
    let store = Arc::new(MessageStore::new(config.db_path()).await?);
    info!("Message Store initialized");

    // Presence registry and the open-connection set
    let presence = Arc::new(PresenceRegistry::new());
    let connections = Arc::new(ConnectionSet::new());

    // Delivery dispatcher, shared by the HTTP and realtime send paths
    let dispatcher = Arc::new(DeliveryDispatcher::new(
        directory.clone(),
        store.clone(),
        presence.clone(),
        config.store_timeout,
    ));
    info!("Delivery Dispatcher initialized");

    // Create app state
    let app_state = AppState {
        directory,
        store,
        presence,
        connections,
        dispatcher,
    };

    let app = Router::new()
        // Account endpoints
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/users/{user_id}", get(list_users))
        // Conversation endpoints
        .route("/api/conversation", post(create_conversation))
        .route("/api/conversation/{user_id}", get(list_conversations))
        // Message endpoints (HTTP variant of the realtime send)
        .route("/api/message", post(send_message))
        .route("/api/message/{conversation_id}", get(list_messages))
        // Realtime channel
        .route("/ws", get(ws_upgrade))
        // Health check
        .route("/health", get(health_check))
        .with_state(app_state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://localhost:{}", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK - Duochat Server"
}
