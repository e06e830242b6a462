//! Paystack callbacks, payment verification and wallet top-ups.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        transaction::PaymentStatusResponse,
        wallet::{TopupRequest, TopupResponse, WalletTopup},
    },
    services::{checkout_service, paystack, wallet_service},
    state::AppState,
};

/// POST /api/v1/paystack/webhook
///
/// The body is taken as raw bytes: the `x-paystack-signature` HMAC is computed
/// over it exactly as received. A bad signature is a 401; anything else that
/// fails is retried by Paystack, so only processing errors are surfaced.
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(paystack::SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    checkout_service::handle_webhook(&state, signature, &body).await?;
    Ok(StatusCode::OK)
}

/// GET /api/v1/payments/verify/{reference} (public)
///
/// Called from the Paystack redirect page. Confirms an order or top-up and
/// reports where it stands.
///
/// ```json
/// { "reference": "DB2501014F3A9C0B12", "kind": "order", "status": "paid" }
/// ```
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let status = checkout_service::confirm_payment(&state, &reference).await?;
    Ok(Json(status))
}

/// POST /api/v1/wallet/topups
///
/// ```json
/// { "amount": 5000 }
/// ```
///
/// Returns the Paystack `authorization_url` to redirect the user to.
pub async fn initialize_topup(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<TopupRequest>,
) -> Result<(StatusCode, Json<TopupResponse>), AppError> {
    let response = wallet_service::initialize_topup(&state, &auth, request.amount).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_topups(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<WalletTopup>>, AppError> {
    let topups = wallet_service::list_topups(&state.pool, auth.user_id).await?;
    Ok(Json(topups))
}
