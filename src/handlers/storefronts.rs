//! Storefront management (owners) and the public storefront surface.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        storefront::{
            PublicStorefrontResponse, SetPricesRequest, Storefront, StorefrontPrice,
            UpsertStorefrontRequest,
        },
        transaction::{CheckoutRequest, CheckoutResponse},
    },
    services::{checkout_service, storefront_service},
    state::AppState,
};

/// Owner view: the storefront plus its custom prices.
#[derive(Debug, Serialize)]
pub struct MyStorefrontResponse {
    #[serde(flatten)]
    pub storefront: Storefront,
    pub prices: Vec<StorefrontPrice>,
}

/// GET /api/v1/storefront
pub async fn get_mine(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MyStorefrontResponse>, AppError> {
    let storefront = storefront_service::get_mine(&state.pool, &auth).await?;
    let prices = storefront_service::list_prices(&state.pool, storefront.id).await?;
    Ok(Json(MyStorefrontResponse { storefront, prices }))
}

/// PUT /api/v1/storefront
///
/// ```json
/// { "slug": "kofi-data", "display_name": "Kofi Data Hub", "whatsapp": "0241234567", "is_open": true }
/// ```
pub async fn upsert(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<UpsertStorefrontRequest>,
) -> Result<Json<Storefront>, AppError> {
    let storefront = storefront_service::upsert(&state.pool, &auth, request).await?;
    Ok(Json(storefront))
}

/// PUT /api/v1/storefront/prices
///
/// Prices below the owner's own tier cost are rejected; `null` clears a custom price.
pub async fn set_prices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SetPricesRequest>,
) -> Result<Json<Vec<StorefrontPrice>>, AppError> {
    let prices = storefront_service::set_prices(&state.pool, &auth, request).await?;
    Ok(Json(prices))
}

/// GET /api/v1/store/{slug} (public)
pub async fn get_public(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PublicStorefrontResponse>, AppError> {
    let storefront = storefront_service::get_public_storefront(&state.pool, &slug).await?;
    Ok(Json(storefront))
}

/// POST /api/v1/store/{slug}/checkout (public)
///
/// # Request Body
///
/// ```json
/// { "bundle_id": "...", "phone_number": "0241234567", "email": "buyer@example.com" }
/// ```
///
/// # Response (201 Created)
///
/// ```json
/// {
///   "reference": "DB2501014F3A9C0B12",
///   "amount": 2600,
///   "authorization_url": "https://checkout.paystack.com/abc123"
/// }
/// ```
pub async fn checkout(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let response = checkout_service::storefront_checkout(&state, &slug, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
