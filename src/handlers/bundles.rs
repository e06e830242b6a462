//! Catalogue endpoints.
//!
//! - GET  /api/v1/bundles - Active bundles at the caller's tier price
//! - GET  /api/v1/admin/bundles - Every bundle with all price tiers
//! - POST /api/v1/admin/bundles - Create
//! - PUT  /api/v1/admin/bundles/{id} - Replace
//! - DELETE /api/v1/admin/bundles/{id} - Deactivate
//! - POST /api/v1/admin/bundles/{id}/vouchers - Upload result-checker vouchers
//! - GET  /api/v1/admin/bundles/{id}/vouchers - Voucher stock

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::bundle::{
        AdminBundleResponse, BundleRequest, BundleResponse, UploadVouchersRequest,
        VoucherStockResponse, VoucherUploadResponse,
    },
    services::bundle_service,
    state::AppState,
};

pub async fn list_bundles(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<BundleResponse>>, AppError> {
    let bundles = bundle_service::list_bundles(&state.pool, auth.role).await?;
    Ok(Json(bundles))
}

pub async fn list_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<AdminBundleResponse>>, AppError> {
    auth.require_admin()?;
    let bundles = bundle_service::list_all(&state.pool).await?;
    Ok(Json(bundles.into_iter().map(AdminBundleResponse::from).collect()))
}

/// Create a bundle.
///
/// # Request Body
///
/// ```json
/// {
///   "kind": "data_bundle",
///   "network": "mtn",
///   "name": "MTN 5GB",
///   "capacity_mb": 5120,
///   "validity_days": 30,
///   "prices": {
///     "base_price": 2000, "master_price": 2100, "super_dealer_price": 2200,
///     "dealer_price": 2300, "agent_price": 2400, "user_price": 2600
///   }
/// }
/// ```
///
/// Tiers must be non-decreasing from `base_price` to `user_price`.
pub async fn create_bundle(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BundleRequest>,
) -> Result<(StatusCode, Json<AdminBundleResponse>), AppError> {
    auth.require_admin()?;
    let bundle = bundle_service::create_bundle(&state.pool, request).await?;
    Ok((StatusCode::CREATED, Json(bundle.into())))
}

pub async fn update_bundle(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(bundle_id): Path<Uuid>,
    Json(request): Json<BundleRequest>,
) -> Result<Json<AdminBundleResponse>, AppError> {
    auth.require_admin()?;
    let bundle = bundle_service::update_bundle(&state.pool, bundle_id, request).await?;
    Ok(Json(bundle.into()))
}

pub async fn deactivate_bundle(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(bundle_id): Path<Uuid>,
) -> Result<Json<AdminBundleResponse>, AppError> {
    auth.require_admin()?;
    let bundle = bundle_service::deactivate_bundle(&state.pool, bundle_id).await?;
    Ok(Json(bundle.into()))
}

/// Upload voucher serial/PIN pairs. Serials already on file are skipped and counted.
///
/// ```json
/// { "vouchers": [ { "serial": "WR2025000001", "pin": "483920174455" } ] }
/// ```
pub async fn upload_vouchers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(bundle_id): Path<Uuid>,
    Json(request): Json<UploadVouchersRequest>,
) -> Result<Json<VoucherUploadResponse>, AppError> {
    auth.require_admin()?;
    let result = bundle_service::upload_vouchers(&state.pool, bundle_id, request.vouchers).await?;
    Ok(Json(result))
}

pub async fn voucher_stock(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(bundle_id): Path<Uuid>,
) -> Result<Json<VoucherStockResponse>, AppError> {
    auth.require_admin()?;
    let stock = bundle_service::voucher_stock(&state.pool, bundle_id).await?;
    Ok(Json(stock))
}
