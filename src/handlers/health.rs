//! Liveness endpoint for load balancers and uptime checks.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{error::AppError, services::settings_service, state::AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    /// Whether purchases are currently paused.
    pub break_mode: bool,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// GET /health
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "break_mode": false,
///   "version": "0.1.0",
///   "timestamp": "2025-01-01T10:00:00Z"
/// }
/// ```
///
/// An unreachable database surfaces as the standard 500 error body.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1").execute(&state.pool).await?;
    let break_mode = settings_service::get_break_mode(&state.pool).await?;

    Ok(Json(HealthResponse {
        status: "healthy",
        database: "connected",
        break_mode: break_mode.enabled,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    }))
}
