//! Authentication endpoints.
//!
//! - POST /api/v1/auth/register - Create a customer account (public)
//! - POST /api/v1/auth/login - Exchange email/password for a session token (public)
//! - POST /api/v1/auth/logout - End the current session
//! - GET  /api/v1/me - Profile and balances of the caller
//! - GET  /api/v1/me/ledger - Caller's ledger entries
//! - POST/GET/DELETE /api/v1/api-keys - Manage reseller API keys

use axum::{
    Extension, Json,
    extract::{Path, Query, Request, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::{AuthContext, bearer_token},
    models::{
        api_key::{ApiKeyResponse, CreateApiKeyRequest},
        ledger::{LedgerEntry, LedgerQuery},
        user::{LoginRequest, LoginResponse, RegisterRequest, UserResponse},
    },
    services::{auth_service, ledger_service, user_service},
    state::AppState,
};

/// Register a customer account.
///
/// # Request Body
///
/// ```json
/// {
///   "email": "ama@example.com",
///   "password": "at-least-8-chars",
///   "full_name": "Ama Mensah",
///   "phone": "0241234567",
///   "referral_slug": "kofi-data"
/// }
/// ```
///
/// # Response (201 Created)
///
/// The new user (role `user`).
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = auth_service::register(&state.pool, request).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Log in.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "token": "9f86d081884c7d659a2feaa0c55ad015...",
///   "expires_at": "2025-01-04T10:00:00Z",
///   "user": { "id": "...", "role": "agent", "wallet_balance": 15000, ... }
/// }
/// ```
///
/// Wrong credentials and disabled accounts both return 401.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = auth_service::login(
        &state.pool,
        &request.email,
        &request.password,
        state.config.session_ttl_hours,
    )
    .await?;
    Ok(Json(response))
}

pub async fn logout(
    State(state): State<AppState>,
    request: Request,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&request)?.to_string();
    auth_service::logout(&state.pool, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::get_user(&state.pool, auth.user_id).await?;
    Ok(Json(user.into()))
}

/// Caller's ledger, newest first.
///
/// # Query Parameters
///
/// - `account`: `wallet`, `profit` or `held` (optional)
/// - `limit` (default 50, max 200), `offset`
pub async fn my_ledger(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<LedgerEntry>>, AppError> {
    let entries = ledger_service::list_entries(&state.pool, auth.user_id, &query).await?;
    Ok(Json(entries))
}

/// Create an API key. The `key` field is returned only in this response.
pub async fn create_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiKeyResponse>), AppError> {
    auth.require_seller()?;
    let key = auth_service::create_api_key(&state.pool, auth.user_id, &request.label).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ApiKeyResponse>>, AppError> {
    let keys = auth_service::list_api_keys(&state.pool, auth.user_id).await?;
    Ok(Json(keys))
}

pub async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth_service::revoke_api_key(&state.pool, auth.user_id, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
