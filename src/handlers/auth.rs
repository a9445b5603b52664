//! Account handlers

use crate::config::AppState;
use crate::directory::DirectoryError;
use crate::error::{Error, Result};
use crate::models::UserProfile;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub token: String,
}

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<UserProfile>> {
    info!("POST /api/register - {}", req.email);

    match state
        .directory
        .register(req.full_name, req.email.clone(), req.password)
        .await
    {
        Ok(profile) => Ok(Json(profile)),
        Err(DirectoryError::Invalid(msg)) => {
            warn!("Registration rejected for {}: {}", req.email, msg);
            Err(Error::BadRequest(msg))
        }
        Err(e) => {
            warn!("Registration failed for {}: {}", req.email, e);
            Err(Error::Internal(e.to_string()))
        }
    }
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    info!("POST /api/login - {}", req.email);

    match state.directory.login(req.email.clone(), req.password).await {
        Ok((user, session)) => Ok(Json(LoginResponse {
            user,
            token: session.token,
        })),
        Err(e) => {
            warn!("Login failed for {}: {}", req.email, e);
            Err(Error::LoginFail)
        }
    }
}

/// GET /api/users/{user_id}
///
/// Every registered user except the caller, for contact discovery.
pub async fn list_users(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserProfile>>> {
    info!("GET /api/users/{}", user_id);

    let users = state.directory.list_others(&user_id).await?;
    Ok(Json(users))
}
