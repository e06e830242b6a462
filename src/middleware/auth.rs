//! Bearer authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the credential from the Authorization header
//! 2. Hash it and resolve it to a session or an API key
//! 3. Inject authentication context into the request
//! 4. Reject unauthorized requests with HTTP 401

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{error::AppError, models::user::Role, services::auth_service, state::AppState};

/// Authentication context attached to authenticated requests.
///
/// Inserted into the request's extension map; handlers extract it with
/// `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub email: String,
}

impl AuthContext {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Resellers (master..agent) and admins.
    pub fn require_seller(&self) -> Result<(), AppError> {
        if self.role.is_admin() || self.role.is_reseller() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(request: &Request) -> Result<&str, AppError> {
    request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)
}

/// Authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Hash the token using SHA-256
/// 3. Look it up among live sessions, or among active API keys when it starts with `dbk_`
/// 4. If found and the user is active: inject `AuthContext`, call next handler
/// 5. Otherwise: return 401 Unauthorized
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&request)?.to_string();

    let auth_context = auth_service::resolve_bearer(&state.pool, &token).await?;

    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}
