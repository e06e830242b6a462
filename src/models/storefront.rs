//! Storefront models.
//!
//! A storefront is a reseller's branded shop, reached at `/store/{slug}`, where
//! guests buy bundles at the reseller's own prices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bundle::BundleResponse;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Storefront {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub slug: String,
    pub display_name: String,
    pub whatsapp: Option<String>,
    pub is_open: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UpsertStorefrontRequest {
    pub slug: String,
    pub display_name: String,
    pub whatsapp: Option<String>,
    #[serde(default = "default_open")]
    pub is_open: bool,
}

fn default_open() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct StorefrontPriceInput {
    pub bundle_id: Uuid,
    /// `None` removes the custom price, falling back to the retail tier.
    pub price: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetPricesRequest {
    pub prices: Vec<StorefrontPriceInput>,
}

#[derive(Debug, Serialize)]
pub struct PublicStorefrontResponse {
    pub slug: String,
    pub display_name: String,
    pub whatsapp: Option<String>,
    pub bundles: Vec<BundleResponse>,
}

/// A custom price set by a storefront owner.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StorefrontPrice {
    pub bundle_id: Uuid,
    pub price: i64,
}
