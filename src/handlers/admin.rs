use axum::{Extension, Json, extract::State};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::ledger::LedgerDrift,
    services::{ledger_service, reconciler},
    state::AppState,
};

/// GET /api/v1/admin/reports/ledger-drift
///
/// Users whose stored balance disagrees with their ledger. Empty when healthy.
pub async fn ledger_drift(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<LedgerDrift>>, AppError> {
    auth.require_admin()?;
    let drift = ledger_service::ledger_drift(&state.pool).await?;
    if !drift.is_empty() {
        tracing::warn!(users = drift.len(), "ledger drift detected");
    }
    Ok(Json(drift))
}

/// POST /api/v1/admin/reconcile
///
/// Run one reconciliation pass now instead of waiting for the next tick.
pub async fn reconcile_now(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<reconciler::ReconcileReport>, AppError> {
    auth.require_admin()?;
    let report = reconciler::reconcile_once(&state).await?;
    tracing::info!(admin = %auth.email, ?report, "manual reconciliation");
    Ok(Json(report))
}
