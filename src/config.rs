//! Chat server configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::delivery::DeliveryDispatcher;
use crate::directory::UserDirectory;
use crate::presence::PresenceRegistry;
use crate::realtime::ConnectionSet;
use crate::store::MessageStore;

/// Configuration for the chat server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port the HTTP/WebSocket listener binds
    pub port: u16,
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,
    /// Upper bound for any single store or directory call
    pub store_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5050,
            data_dir: PathBuf::from("chat_data"),
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Read configuration from CHAT_* environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("CHAT_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(dir) = std::env::var("CHAT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("CHAT_STORE_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.store_timeout = Duration::from_secs(secs);
            }
        }
        config
    }

    /// Create config with custom base directory (used by tests)
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the SQLite database shared by the directory and the store
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chat.sqlite")
    }

    /// Ensure the data directory exists
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<UserDirectory>,
    pub store: Arc<MessageStore>,
    pub presence: Arc<PresenceRegistry>,
    pub connections: Arc<ConnectionSet>,
    pub dispatcher: Arc<DeliveryDispatcher>,
}
