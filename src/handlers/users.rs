//! Account management for resellers (their downline) and admins (everyone).

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::user::{
        CreateUserRequest, ListUsersQuery, SetActiveRequest, SetRoleRequest, UserResponse,
        WalletAdjustmentRequest,
    },
    services::user_service,
    state::AppState,
};

/// POST /api/v1/users
///
/// # Request Body
///
/// ```json
/// {
///   "email": "dealer@example.com",
///   "password": "s3cret-pass",
///   "full_name": "Kojo Asante",
///   "phone": "0201234567",
///   "role": "dealer"
/// }
/// ```
///
/// Resellers may only create roles below their own; the new account is
/// parented to the caller. Admins may pass `parent_id`.
pub async fn create_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = user_service::create_user(&state.pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// GET /api/v1/users?role=agent&limit=50&offset=0
pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let users = user_service::list_users(&state.pool, &auth, &query).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// GET /api/v1/users/{id}
///
/// Admins see anyone; resellers see their direct downline.
pub async fn get_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    let user = user_service::get_user(&state.pool, user_id).await?;
    if !auth.is_admin() && user.id != auth.user_id && user.parent_id != Some(auth.user_id) {
        return Err(AppError::NotFound("User"));
    }
    Ok(Json(user.into()))
}

/// PUT /api/v1/admin/users/{id}/role
pub async fn set_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<SetRoleRequest>,
) -> Result<Json<UserResponse>, AppError> {
    auth.require_admin()?;
    let user = user_service::set_role(&state.pool, user_id, request.role).await?;
    Ok(Json(user.into()))
}

/// PUT /api/v1/admin/users/{id}/active
pub async fn set_active(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<SetActiveRequest>,
) -> Result<Json<UserResponse>, AppError> {
    auth.require_admin()?;
    let user = user_service::set_active(&state.pool, &auth, user_id, request.is_active).await?;
    Ok(Json(user.into()))
}

/// POST /api/v1/admin/users/{id}/wallet-adjustments
///
/// ```json
/// { "amount": -500, "reason": "Duplicate top-up reversed" }
/// ```
pub async fn adjust_wallet(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<WalletAdjustmentRequest>,
) -> Result<Json<UserResponse>, AppError> {
    auth.require_admin()?;
    let user = user_service::adjust_wallet(&state.pool, &auth, user_id, request).await?;
    Ok(Json(user.into()))
}
