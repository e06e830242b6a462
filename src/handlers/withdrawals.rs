//! Profit withdrawals: requested by resellers, reviewed by admins.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::withdrawal::{
        ListWithdrawalsQuery, ReviewWithdrawalRequest, Withdrawal, WithdrawalRequest,
    },
    services::withdrawal_service,
    state::AppState,
};

/// POST /api/v1/withdrawals
///
/// ```json
/// {
///   "amount": 25000,
///   "method": "momo",
///   "account_name": "Kofi Boateng",
///   "account_number": "0241234567",
///   "provider": "MTN MoMo"
/// }
/// ```
///
/// The amount moves from the profit balance to the held balance until reviewed.
pub async fn request_withdrawal(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<Withdrawal>), AppError> {
    let withdrawal = withdrawal_service::request_withdrawal(&state.pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// GET /api/v1/withdrawals?status=pending
///
/// Own withdrawals; admins see all.
pub async fn list_withdrawals(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListWithdrawalsQuery>,
) -> Result<Json<Vec<Withdrawal>>, AppError> {
    let withdrawals = withdrawal_service::list_withdrawals(&state.pool, &auth, &query).await?;
    Ok(Json(withdrawals))
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<ReviewWithdrawalRequest>>,
) -> Result<Json<Withdrawal>, AppError> {
    auth.require_admin()?;
    let note = request.and_then(|Json(r)| r.note);
    let withdrawal = withdrawal_service::approve(&state.pool, id, note).await?;
    Ok(Json(withdrawal))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<ReviewWithdrawalRequest>>,
) -> Result<Json<Withdrawal>, AppError> {
    auth.require_admin()?;
    let note = request.and_then(|Json(r)| r.note);
    let withdrawal = withdrawal_service::reject(&state.pool, id, note).await?;
    Ok(Json(withdrawal))
}

pub async fn mark_paid(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<ReviewWithdrawalRequest>>,
) -> Result<Json<Withdrawal>, AppError> {
    auth.require_admin()?;
    let note = request.and_then(|Json(r)| r.note);
    let withdrawal = withdrawal_service::mark_paid(&state.pool, id, note).await?;
    Ok(Json(withdrawal))
}
