//! Catalogue management and result-checker voucher stock.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        bundle::{
            Bundle, BundleKind, BundleRequest, BundleResponse, Voucher, VoucherStockResponse,
            VoucherUploadResponse,
        },
        user::Role,
    },
    services::pricing,
    validation,
};

const MAX_VOUCHERS_PER_UPLOAD: usize = 5_000;

/// Active catalogue priced for `role`.
pub async fn list_bundles(pool: &DbPool, role: Role) -> Result<Vec<BundleResponse>, AppError> {
    let bundles = sqlx::query_as::<_, Bundle>(
        "SELECT * FROM bundles WHERE is_active ORDER BY kind, network, user_price",
    )
    .fetch_all(pool)
    .await?;

    Ok(bundles
        .into_iter()
        .map(|bundle| BundleResponse::for_role(bundle, role))
        .collect())
}

/// Whole catalogue including deactivated entries.
pub async fn list_all(pool: &DbPool) -> Result<Vec<Bundle>, AppError> {
    let bundles = sqlx::query_as::<_, Bundle>("SELECT * FROM bundles ORDER BY kind, network, name")
        .fetch_all(pool)
        .await?;
    Ok(bundles)
}

/// Any bundle, active or not. Used for historical views such as receipts.
pub async fn get_bundle(pool: &DbPool, bundle_id: Uuid) -> Result<Bundle, AppError> {
    sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE id = $1")
        .bind(bundle_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Bundle"))
}

pub async fn get_active(pool: &DbPool, bundle_id: Uuid) -> Result<Bundle, AppError> {
    sqlx::query_as::<_, Bundle>("SELECT * FROM bundles WHERE id = $1 AND is_active")
        .bind(bundle_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Bundle"))
}

/// Validated, normalized form of a `BundleRequest`.
fn validate(request: BundleRequest) -> Result<BundleRequest, AppError> {
    pricing::validate_tiers(&request.prices)?;
    let name = validation::require_text(&request.name, "name", 80)?;

    match request.kind {
        BundleKind::DataBundle => {
            if request.network.is_none() {
                return Err(AppError::InvalidRequest(
                    "Data bundles need a network".to_string(),
                ));
            }
            match request.capacity_mb {
                Some(mb) if mb > 0 => {}
                _ => {
                    return Err(AppError::InvalidRequest(
                        "Data bundles need a positive capacity_mb".to_string(),
                    ));
                }
            }
            Ok(BundleRequest {
                name,
                exam_board: None,
                ..request
            })
        }
        BundleKind::ResultChecker => {
            let board = request
                .exam_board
                .as_deref()
                .map(|b| validation::require_text(b, "exam_board", 40))
                .transpose()?
                .ok_or_else(|| {
                    AppError::InvalidRequest("Result checkers need an exam_board".to_string())
                })?;
            Ok(BundleRequest {
                name,
                exam_board: Some(board.to_uppercase()),
                network: None,
                capacity_mb: None,
                ..request
            })
        }
    }
}

pub async fn create_bundle(pool: &DbPool, request: BundleRequest) -> Result<Bundle, AppError> {
    let request = validate(request)?;
    let p = request.prices;

    let bundle = sqlx::query_as::<_, Bundle>(
        r#"
        INSERT INTO bundles (
            kind, network, exam_board, name, capacity_mb, validity_days,
            base_price, master_price, super_dealer_price, dealer_price, agent_price, user_price
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING *
        "#,
    )
    .bind(request.kind)
    .bind(request.network)
    .bind(request.exam_board)
    .bind(request.name)
    .bind(request.capacity_mb)
    .bind(request.validity_days)
    .bind(p.base_price)
    .bind(p.master_price)
    .bind(p.super_dealer_price)
    .bind(p.dealer_price)
    .bind(p.agent_price)
    .bind(p.user_price)
    .fetch_one(pool)
    .await?;

    tracing::info!(bundle_id = %bundle.id, name = %bundle.name, "bundle created");
    Ok(bundle)
}

/// Replace a catalogue entry's details and prices. Activation is left as is.
///
/// # Errors
///
/// - `NotFound`: unknown bundle
/// - `Conflict`: `kind` changes while vouchers or orders reference the bundle
pub async fn update_bundle(
    pool: &DbPool,
    bundle_id: Uuid,
    request: BundleRequest,
) -> Result<Bundle, AppError> {
    let request = validate(request)?;
    let p = request.prices;

    let mut tx = pool.begin().await?;

    let current: BundleKind = sqlx::query_scalar("SELECT kind FROM bundles WHERE id = $1 FOR UPDATE")
        .bind(bundle_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Bundle"))?;

    if current != request.kind {
        let referenced: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM vouchers WHERE bundle_id = $1)
                OR EXISTS(SELECT 1 FROM transactions WHERE bundle_id = $1)
            "#,
        )
        .bind(bundle_id)
        .fetch_one(&mut *tx)
        .await?;
        if referenced {
            return Err(AppError::Conflict(format!(
                "Bundle has stock or orders; it cannot become a {}",
                request.kind
            )));
        }
    }

    let bundle = sqlx::query_as::<_, Bundle>(
        r#"
        UPDATE bundles SET
            kind = $2, network = $3, exam_board = $4, name = $5, capacity_mb = $6,
            validity_days = $7, base_price = $8, master_price = $9, super_dealer_price = $10,
            dealer_price = $11, agent_price = $12, user_price = $13, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(bundle_id)
    .bind(request.kind)
    .bind(request.network)
    .bind(request.exam_board)
    .bind(request.name)
    .bind(request.capacity_mb)
    .bind(request.validity_days)
    .bind(p.base_price)
    .bind(p.master_price)
    .bind(p.super_dealer_price)
    .bind(p.dealer_price)
    .bind(p.agent_price)
    .bind(p.user_price)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(bundle_id = %bundle.id, "bundle updated");
    Ok(bundle)
}

/// Hide a bundle from the catalogue. Existing orders keep referencing it.
pub async fn deactivate_bundle(pool: &DbPool, bundle_id: Uuid) -> Result<Bundle, AppError> {
    let bundle = sqlx::query_as::<_, Bundle>(
        "UPDATE bundles SET is_active = false, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(bundle_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Bundle"))?;

    tracing::info!(bundle_id = %bundle.id, "bundle deactivated");
    Ok(bundle)
}

/// Load serial/PIN pairs for a result-checker bundle. Serials already known are skipped.
pub async fn upload_vouchers(
    pool: &DbPool,
    bundle_id: Uuid,
    vouchers: Vec<Voucher>,
) -> Result<VoucherUploadResponse, AppError> {
    if vouchers.is_empty() || vouchers.len() > MAX_VOUCHERS_PER_UPLOAD {
        return Err(AppError::InvalidRequest(format!(
            "Upload between 1 and {MAX_VOUCHERS_PER_UPLOAD} vouchers at a time"
        )));
    }

    let kind: BundleKind = sqlx::query_scalar("SELECT kind FROM bundles WHERE id = $1")
        .bind(bundle_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Bundle"))?;
    if kind != BundleKind::ResultChecker {
        return Err(AppError::InvalidRequest(
            "Vouchers can only be loaded for result checkers".to_string(),
        ));
    }

    let mut serials = Vec::with_capacity(vouchers.len());
    let mut pins = Vec::with_capacity(vouchers.len());
    for voucher in &vouchers {
        let serial = voucher.serial.trim();
        let pin = voucher.pin.trim();
        if serial.is_empty() || pin.is_empty() {
            return Err(AppError::InvalidRequest(
                "Every voucher needs a serial and a pin".to_string(),
            ));
        }
        serials.push(serial.to_string());
        pins.push(pin.to_string());
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO vouchers (bundle_id, serial, pin)
        SELECT $1, serial, pin FROM UNNEST($2::TEXT[], $3::TEXT[]) AS v(serial, pin)
        ON CONFLICT (serial) DO NOTHING
        "#,
    )
    .bind(bundle_id)
    .bind(&serials)
    .bind(&pins)
    .execute(pool)
    .await?
    .rows_affected();

    let duplicates = vouchers.len() as u64 - inserted;
    tracing::info!(bundle_id = %bundle_id, inserted, duplicates, "vouchers uploaded");

    Ok(VoucherUploadResponse {
        inserted,
        duplicates,
    })
}

pub async fn voucher_stock(pool: &DbPool, bundle_id: Uuid) -> Result<VoucherStockResponse, AppError> {
    let (available, sold): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FILTER (WHERE transaction_id IS NULL),
               COUNT(*) FILTER (WHERE transaction_id IS NOT NULL)
        FROM vouchers WHERE bundle_id = $1
        "#,
    )
    .bind(bundle_id)
    .fetch_one(pool)
    .await?;

    Ok(VoucherStockResponse {
        bundle_id,
        available,
        sold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bundle::{Network, PriceTiers};
    use sqlx::PgPool;

    fn request(kind: BundleKind) -> BundleRequest {
        BundleRequest {
            kind,
            network: Some(Network::Mtn),
            exam_board: Some(" waec ".to_string()),
            name: "  MTN 1GB ".to_string(),
            capacity_mb: Some(1024),
            validity_days: Some(30),
            prices: PriceTiers {
                base_price: 400,
                master_price: 420,
                super_dealer_price: 440,
                dealer_price: 460,
                agent_price: 480,
                user_price: 500,
            },
        }
    }

    #[test]
    fn data_bundles_drop_exam_board() {
        let cleaned = validate(request(BundleKind::DataBundle)).unwrap();
        assert_eq!(cleaned.name, "MTN 1GB");
        assert_eq!(cleaned.exam_board, None);
        assert_eq!(cleaned.network, Some(Network::Mtn));
    }

    #[test]
    fn result_checkers_drop_network_fields() {
        let cleaned = validate(request(BundleKind::ResultChecker)).unwrap();
        assert_eq!(cleaned.exam_board.as_deref(), Some("WAEC"));
        assert_eq!(cleaned.network, None);
        assert_eq!(cleaned.capacity_mb, None);
    }

    #[test]
    fn data_bundles_need_capacity() {
        let mut bad = request(BundleKind::DataBundle);
        bad.capacity_mb = Some(0);
        assert!(matches!(validate(bad), Err(AppError::InvalidRequest(_))));
    }

    #[sqlx::test]
    async fn editing_keeps_a_deactivated_bundle_hidden(pool: PgPool) {
        let created = create_bundle(&pool, request(BundleKind::DataBundle)).await.unwrap();
        deactivate_bundle(&pool, created.id).await.unwrap();

        let mut cheaper = request(BundleKind::DataBundle);
        cheaper.prices.user_price = 490;
        let updated = update_bundle(&pool, created.id, cheaper).await.unwrap();

        assert!(!updated.is_active);
        assert_eq!(updated.prices.user_price, 490);
        assert!(matches!(
            get_active(&pool, created.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[sqlx::test]
    async fn kind_is_locked_once_stock_exists(pool: PgPool) {
        let checker = create_bundle(&pool, request(BundleKind::ResultChecker))
            .await
            .unwrap();
        let unused = create_bundle(&pool, request(BundleKind::ResultChecker))
            .await
            .unwrap();
        upload_vouchers(
            &pool,
            checker.id,
            vec![Voucher {
                serial: "SN-1".to_string(),
                pin: "1234".to_string(),
            }],
        )
        .await
        .unwrap();

        assert!(matches!(
            update_bundle(&pool, checker.id, request(BundleKind::DataBundle)).await,
            Err(AppError::Conflict(_))
        ));
        let converted = update_bundle(&pool, unused.id, request(BundleKind::DataBundle))
            .await
            .unwrap();
        assert_eq!(converted.kind, BundleKind::DataBundle);
    }

    #[sqlx::test]
    async fn updating_unknown_bundle_is_not_found(pool: PgPool) {
        let result = update_bundle(&pool, Uuid::new_v4(), request(BundleKind::DataBundle)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[test]
    fn broken_tiers_are_rejected() {
        let mut bad = request(BundleKind::DataBundle);
        bad.prices.agent_price = 510;
        assert!(matches!(validate(bad), Err(AppError::InvalidRequest(_))));
    }
}
