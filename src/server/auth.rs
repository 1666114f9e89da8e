//! Login and session endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::error::ApiError;
use super::AppState;
use crate::auth::{issue_token, verify_password, verify_token, SecretStore, TokenLifetime};
use crate::database::collections::USERS;
use crate::database::{Document, Filter};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Slug or email
    pub login: String,
    pub pass: String,
    #[serde(default)]
    pub expires: TokenLifetime,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: Document,
    pub token: String,
}

/// User document as exposed over HTTP
fn public_user(mut user: Document) -> Document {
    user.remove("pass");
    user
}

/// `POST /login`
pub async fn login_handler(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload?;
    if request.login.is_empty() {
        return Err(ApiError::BadRequest("login must not be empty".to_string()));
    }

    let filter = Filter::Or(vec![
        Filter::eq("slug", request.login.as_str()),
        Filter::eq("email", request.login.as_str()),
    ]);
    let user = state
        .store
        .find_one(USERS, &filter)
        .await?
        .ok_or_else(|| ApiError::Forbidden("user not found".to_string()))?;

    let hash = user
        .get("pass")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Forbidden("user has no password".to_string()))?;
    if !verify_password(&request.pass, hash)? {
        debug!("Rejected login for {}", request.login);
        return Err(ApiError::Forbidden("invalid credentials".to_string()));
    }

    let user_id = user
        .get("_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let secret = SecretStore::new(state.store.clone()).require().await?;
    let token = issue_token(&secret, &user_id, request.expires)?;

    info!("User {} logged in", user_id);
    Ok(Json(LoginResponse {
        user: public_user(user),
        token,
    }))
}

/// `GET /session`: the user behind the bearer token
pub async fn session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Document>, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Forbidden("missing bearer token".to_string()))?;

    // Read on every request so a rotated secret applies immediately
    let secret = SecretStore::new(state.store.clone()).require().await?;
    let claims = verify_token(&secret, token)?;

    let user = state
        .store
        .find_one(USERS, &Filter::id(claims.user_id.as_str()))
        .await?
        .ok_or_else(|| ApiError::Forbidden("user no longer exists".to_string()))?;
    Ok(Json(public_user(user)))
}
