use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::announcement::{
        Announcement, CreateAnnouncementRequest, SetAnnouncementActiveRequest,
    },
    services::announcement_service,
    state::AppState,
};

/// GET /api/v1/announcements
///
/// Active announcements for everyone or for the caller's role, newest first.
pub async fn list_active(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Announcement>>, AppError> {
    let announcements = announcement_service::list_active(&state.pool, auth.role).await?;
    Ok(Json(announcements))
}

pub async fn list_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<Announcement>>, AppError> {
    auth.require_admin()?;
    let announcements = announcement_service::list_all(&state.pool).await?;
    Ok(Json(announcements))
}

/// POST /api/v1/admin/announcements
///
/// ```json
/// { "title": "MTN delays", "body": "MTN bundles may take up to 30 minutes today.", "audience": "agent" }
/// ```
///
/// `audience` defaults to `all`.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateAnnouncementRequest>,
) -> Result<(StatusCode, Json<Announcement>), AppError> {
    auth.require_admin()?;
    let announcement = announcement_service::create(&state.pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(announcement)))
}

pub async fn set_active(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetAnnouncementActiveRequest>,
) -> Result<Json<Announcement>, AppError> {
    auth.require_admin()?;
    let announcement = announcement_service::set_active(&state.pool, id, request.is_active).await?;
    Ok(Json(announcement))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_admin()?;
    announcement_service::delete(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
