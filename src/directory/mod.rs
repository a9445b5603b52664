//! User Directory
//!
//! Handles registration, login, and profile lookup. All account data stored
//! in the shared SQLite database; password hashes never leave this module.

use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Session, User, UserProfile};

/// Registration failures the HTTP layer can tell apart: caller mistakes
/// versus a broken directory
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Directory of registered users; the delivery path consumes only
/// `profile_by_id`.
pub struct UserDirectory {
    db_path: PathBuf,
}

impl UserDirectory {
    /// Create new directory backed by the database at `db_path`
    pub async fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let directory = Self {
            db_path: db_path.into(),
        };

        directory.init_db().await?;

        info!("[Directory] Initialized at {:?}", directory.db_path);

        Ok(directory)
    }

    /// Initialize SQLite tables
    async fn init_db(&self) -> Result<()> {
        let pool = self.get_pool().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        pool.close().await;
        Ok(())
    }

    /// Get database connection
    async fn get_pool(&self) -> Result<sqlx::SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .create_if_missing(true);
        Ok(SqlitePoolOptions::new().connect_with(options).await?)
    }

    /// Register a new user
    pub async fn register(
        &self,
        full_name: String,
        email: String,
        password: String,
    ) -> std::result::Result<UserProfile, DirectoryError> {
        if full_name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(DirectoryError::Invalid(
                "Full name, email, and password are required".to_string(),
            ));
        }

        let pool = self.get_pool().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&pool)
            .await
            .context("Failed to check existing email")?;

        if existing.is_some() {
            return Err(DirectoryError::Invalid("Email already registered".to_string()));
        }

        let password_hash = hash(&password, DEFAULT_COST).context("Failed to hash password")?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            full_name,
            email,
            password_hash,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, full_name, email, password_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at.to_rfc3339())
        .execute(&pool)
        .await
        .context("Failed to insert user")?;

        pool.close().await;

        info!("[Directory] User registered: {} ({})", user.full_name, user.email);

        Ok(user.into())
    }

    /// Login user and create session
    pub async fn login(&self, email: String, password: String) -> Result<(UserProfile, Session)> {
        let pool = self.get_pool().await?;

        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, full_name, email, password_hash FROM users WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&pool)
        .await?;

        // Unknown email and wrong password are indistinguishable to the caller
        let (user_id, full_name, email, password_hash) =
            row.ok_or_else(|| anyhow::anyhow!("Invalid email or password"))?;

        let valid = verify(&password, &password_hash).context("Failed to verify password")?;

        if !valid {
            warn!("[Directory] Failed login attempt for {}", email);
            return Err(anyhow::anyhow!("Invalid email or password"));
        }

        let session = self.create_session(&pool, &user_id).await?;

        pool.close().await;

        info!("[Directory] User logged in: {}", full_name);

        Ok((
            UserProfile {
                id: user_id,
                full_name,
                email,
            },
            session,
        ))
    }

    /// Create new session
    async fn create_session(&self, pool: &sqlx::SqlitePool, user_id: &str) -> Result<Session> {
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(30),
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(pool)
        .await?;

        Ok(session)
    }

    /// Get public profile by user ID; absence is `None`, not an error
    pub async fn profile_by_id(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let pool = self.get_pool().await?;

        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, full_name, email FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&pool)
                .await?;

        pool.close().await;

        Ok(row.map(|(id, full_name, email)| UserProfile {
            id,
            full_name,
            email,
        }))
    }

    /// List all users except the caller (for contact discovery)
    pub async fn list_others(&self, user_id: &str) -> Result<Vec<UserProfile>> {
        let pool = self.get_pool().await?;

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT id, full_name, email FROM users WHERE id != ? ORDER BY full_name",
        )
        .bind(user_id)
        .fetch_all(&pool)
        .await?;

        pool.close().await;

        Ok(rows
            .into_iter()
            .map(|(id, full_name, email)| UserProfile {
                id,
                full_name,
                email,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn directory_in(dir: &tempfile::TempDir) -> UserDirectory {
        UserDirectory::new(dir.path().join("chat.sqlite"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_and_login() {
        let dir = tempdir().unwrap();
        let directory = directory_in(&dir).await;

        let profile = directory
            .register(
                "Ada Lovelace".into(),
                "ada@example.com".into(),
                "difference-engine".into(),
            )
            .await
            .unwrap();
        assert_eq!(profile.full_name, "Ada Lovelace");

        let (user, session) = directory
            .login("ada@example.com".into(), "difference-engine".into())
            .await
            .unwrap();
        assert_eq!(user.id, profile.id);
        assert!(session.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn duplicate_email_rejected() {
        let dir = tempdir().unwrap();
        let directory = directory_in(&dir).await;

        directory
            .register("Ada".into(), "ada@example.com".into(), "pw1".into())
            .await
            .unwrap();
        let err = directory
            .register("Other Ada".into(), "ada@example.com".into(), "pw2".into())
            .await
            .unwrap_err();
        assert!(matches!(&err, DirectoryError::Invalid(_)));
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn register_requires_all_fields() {
        let dir = tempdir().unwrap();
        let directory = directory_in(&dir).await;

        let err = directory
            .register("  ".into(), "ada@example.com".into(), "pw".into())
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn internal_failures_are_not_reported_as_invalid() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("chat.sqlite");
        let directory = UserDirectory::new(&db).await.unwrap();

        // Turn the database file into a directory so the next open fails
        std::fs::remove_file(&db).unwrap();
        std::fs::create_dir(&db).unwrap();

        let err = directory
            .register("Ada".into(), "ada@example.com".into(), "pw".into())
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::Internal(_)));
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let dir = tempdir().unwrap();
        let directory = directory_in(&dir).await;

        directory
            .register("Ada".into(), "ada@example.com".into(), "right".into())
            .await
            .unwrap();
        let err = directory
            .login("ada@example.com".into(), "wrong".into())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid email or password");
    }

    #[tokio::test]
    async fn profile_of_unknown_id_is_none() {
        let dir = tempdir().unwrap();
        let directory = directory_in(&dir).await;

        assert!(directory.profile_by_id("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_others_excludes_caller() {
        let dir = tempdir().unwrap();
        let directory = directory_in(&dir).await;

        let ada = directory
            .register("Ada".into(), "ada@example.com".into(), "pw".into())
            .await
            .unwrap();
        let bob = directory
            .register("Bob".into(), "bob@example.com".into(), "pw".into())
            .await
            .unwrap();

        let others = directory.list_others(&ada.id).await.unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, bob.id);
    }
}
