use axum::{Extension, Json, extract::State};

use crate::{
    error::AppError, middleware::auth::AuthContext, models::settings::BreakMode,
    services::settings_service, state::AppState,
};

/// GET /api/v1/settings/break-mode (public)
///
/// ```json
/// { "enabled": true, "message": "Back at 6pm" }
/// ```
pub async fn get_break_mode(State(state): State<AppState>) -> Result<Json<BreakMode>, AppError> {
    let mode = settings_service::get_break_mode(&state.pool).await?;
    Ok(Json(mode))
}

/// PUT /api/v1/admin/settings/break-mode
pub async fn set_break_mode(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(mode): Json<BreakMode>,
) -> Result<Json<BreakMode>, AppError> {
    auth.require_admin()?;
    let mode = settings_service::set_break_mode(&state.pool, mode).await?;
    tracing::info!(enabled = mode.enabled, admin = %auth.email, "break mode updated");
    Ok(Json(mode))
}
