//! Reseller storefronts and their custom prices.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, conflict_on_unique},
    middleware::auth::AuthContext,
    models::{
        bundle::{Bundle, BundleResponse, PriceTiers},
        storefront::{
            PublicStorefrontResponse, SetPricesRequest, Storefront, StorefrontPrice,
            UpsertStorefrontRequest,
        },
        user::Role,
    },
    services::pricing,
    validation,
};

/// Price a guest pays on a storefront.
///
/// A custom price is honoured only while it still covers the owner's cost
/// (the owner may have been moved to another tier since setting it);
/// otherwise the retail tier applies.
pub fn store_price(tiers: &PriceTiers, owner_role: Role, custom: Option<i64>) -> i64 {
    let cost = pricing::price_for(tiers, owner_role);
    custom
        .filter(|price| *price >= cost)
        .unwrap_or(tiers.user_price)
}

/// Create or update the caller's storefront. Resellers only.
pub async fn upsert(
    pool: &DbPool,
    auth: &AuthContext,
    request: UpsertStorefrontRequest,
) -> Result<Storefront, AppError> {
    if !auth.role.is_reseller() {
        return Err(AppError::Forbidden);
    }

    let slug = request.slug.trim().to_lowercase();
    validation::validate_slug(&slug)?;
    let display_name = validation::require_text(&request.display_name, "display_name", 80)?;
    let whatsapp = request
        .whatsapp
        .as_deref()
        .filter(|w| !w.trim().is_empty())
        .map(validation::normalize_phone)
        .transpose()?;

    let storefront = sqlx::query_as::<_, Storefront>(
        r#"
        INSERT INTO storefronts (owner_id, slug, display_name, whatsapp, is_open)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (owner_id) DO UPDATE SET
            slug = EXCLUDED.slug,
            display_name = EXCLUDED.display_name,
            whatsapp = EXCLUDED.whatsapp,
            is_open = EXCLUDED.is_open,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(auth.user_id)
    .bind(&slug)
    .bind(display_name)
    .bind(whatsapp)
    .bind(request.is_open)
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "This storefront address is already taken"))?;

    tracing::info!(storefront_id = %storefront.id, slug = %storefront.slug, "storefront saved");
    Ok(storefront)
}

pub async fn get_mine(pool: &DbPool, auth: &AuthContext) -> Result<Storefront, AppError> {
    sqlx::query_as::<_, Storefront>("SELECT * FROM storefronts WHERE owner_id = $1")
        .bind(auth.user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Storefront"))
}

pub async fn list_prices(pool: &DbPool, storefront_id: Uuid) -> Result<Vec<StorefrontPrice>, AppError> {
    let prices = sqlx::query_as::<_, StorefrontPrice>(
        "SELECT bundle_id, price FROM storefront_prices WHERE storefront_id = $1",
    )
    .bind(storefront_id)
    .fetch_all(pool)
    .await?;
    Ok(prices)
}

/// Set or clear custom prices on the caller's storefront, all or nothing.
pub async fn set_prices(
    pool: &DbPool,
    auth: &AuthContext,
    request: SetPricesRequest,
) -> Result<Vec<StorefrontPrice>, AppError> {
    let storefront = get_mine(pool, auth).await?;

    let mut tx = pool.begin().await?;
    for input in request.prices {
        match input.price {
            Some(price) => {
                let bundle = sqlx::query_as::<_, Bundle>(
                    "SELECT * FROM bundles WHERE id = $1 AND is_active",
                )
                .bind(input.bundle_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(AppError::NotFound("Bundle"))?;

                pricing::validate_store_price(&bundle.prices, auth.role, price)?;

                sqlx::query(
                    r#"
                    INSERT INTO storefront_prices (storefront_id, bundle_id, price)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (storefront_id, bundle_id) DO UPDATE SET price = EXCLUDED.price
                    "#,
                )
                .bind(storefront.id)
                .bind(input.bundle_id)
                .bind(price)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM storefront_prices WHERE storefront_id = $1 AND bundle_id = $2",
                )
                .bind(storefront.id)
                .bind(input.bundle_id)
                .execute(&mut *tx)
                .await?;
            }
        }
    }
    tx.commit().await?;

    list_prices(pool, storefront.id).await
}

/// An open storefront whose owner can still sell, with the owner's role.
pub async fn open_storefront(pool: &DbPool, slug: &str) -> Result<(Storefront, Role), AppError> {
    let storefront = sqlx::query_as::<_, Storefront>(
        r#"
        SELECT s.* FROM storefronts s
        JOIN users u ON u.id = s.owner_id
        WHERE s.slug = $1 AND s.is_open AND u.is_active
        "#,
    )
    .bind(slug.trim().to_lowercase())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Storefront"))?;

    let owner_role: Role = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
        .bind(storefront.owner_id)
        .fetch_one(pool)
        .await?;

    if !owner_role.is_reseller() {
        return Err(AppError::NotFound("Storefront"));
    }

    Ok((storefront, owner_role))
}

/// Custom price of one bundle on a storefront, if any.
pub async fn custom_price(
    pool: &DbPool,
    storefront_id: Uuid,
    bundle_id: Uuid,
) -> Result<Option<i64>, AppError> {
    let price = sqlx::query_scalar(
        "SELECT price FROM storefront_prices WHERE storefront_id = $1 AND bundle_id = $2",
    )
    .bind(storefront_id)
    .bind(bundle_id)
    .fetch_optional(pool)
    .await?;
    Ok(price)
}

pub async fn get_public_storefront(
    pool: &DbPool,
    slug: &str,
) -> Result<PublicStorefrontResponse, AppError> {
    let (storefront, owner_role) = open_storefront(pool, slug).await?;

    let custom: HashMap<Uuid, i64> = list_prices(pool, storefront.id)
        .await?
        .into_iter()
        .map(|p| (p.bundle_id, p.price))
        .collect();

    let bundles = sqlx::query_as::<_, Bundle>(
        "SELECT * FROM bundles WHERE is_active ORDER BY kind, network, user_price",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|bundle| {
        let price = store_price(&bundle.prices, owner_role, custom.get(&bundle.id).copied());
        BundleResponse::priced(bundle, price)
    })
    .collect();

    Ok(PublicStorefrontResponse {
        slug: storefront.slug,
        display_name: storefront.display_name,
        whatsapp: storefront.whatsapp,
        bundles,
    })
}
