//! Orders: wallet purchases, history and receipts.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::transaction::{
        ListOrdersQuery, PurchaseRequest, PurchaseResponse, TransactionResponse,
    },
    services::{bundle_service, checkout_service, receipt, transaction_service},
    state::AppState,
};

/// Buy from the wallet.
///
/// # Request Body
///
/// ```json
/// {
///   "bundle_id": "550e8400-e29b-41d4-a716-446655440000",
///   "phone_numbers": ["0241234567", "0551234567"],
///   "idempotency_key": "order-2025-001"
/// }
/// ```
///
/// # Response (201 Created)
///
/// ```json
/// {
///   "batch_reference": "DB2501017A1B2C3D4E",
///   "total_amount": 4800,
///   "wallet_balance": 15200,
///   "transactions": [ { "reference": "DB2501017A1B2C3D4E", "status": "paid", ... } ]
/// }
/// ```
///
/// Sending the same `idempotency_key` again returns the original batch.
pub async fn purchase(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    let response = checkout_service::wallet_purchase(&state, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/orders?status=delivered&limit=50&offset=0
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<TransactionResponse>>, AppError> {
    let transactions = transaction_service::list_visible(&state.pool, &auth, &query).await?;
    Ok(Json(
        transactions.into_iter().map(TransactionResponse::from).collect(),
    ))
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(reference): Path<String>,
) -> Result<Json<TransactionResponse>, AppError> {
    let transaction = transaction_service::get_visible(&state.pool, &auth, &reference).await?;
    Ok(Json(transaction.into()))
}

/// GET /api/v1/orders/{reference}/receipt (public)
///
/// Plain-text receipt. Guests only know their reference, so no login is required.
pub async fn receipt(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = transaction_service::get_by_reference(&state.pool, &reference)
        .await?
        .ok_or(AppError::NotFound("Order"))?;
    let bundle = bundle_service::get_bundle(&state.pool, transaction.bundle_id).await?;
    let vouchers = transaction_service::vouchers_for(&state.pool, transaction.id).await?;

    let body = receipt::render(&transaction, &bundle, &vouchers);
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}
