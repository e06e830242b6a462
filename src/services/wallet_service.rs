//! Wallet top-ups through Paystack.

use serde_json::json;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        ledger::{LedgerAccount, LedgerKind},
        transaction::PaymentStatusResponse,
        wallet::{TopupResponse, TopupStatus, WalletTopup},
    },
    services::{
        checkout_service::{self, ChargeCheck},
        ledger_service::{self, Posting},
        paystack::ChargeStatus,
        transaction_service,
    },
    state::AppState,
};

/// 1 GHS.
pub const MIN_TOPUP: i64 = 100;
/// 100,000 GHS.
pub const MAX_TOPUP: i64 = 10_000_000;

pub async fn initialize_topup(
    state: &AppState,
    auth: &AuthContext,
    amount: i64,
) -> Result<TopupResponse, AppError> {
    if !(MIN_TOPUP..=MAX_TOPUP).contains(&amount) {
        return Err(AppError::InvalidRequest(format!(
            "Top-up amount must be between {MIN_TOPUP} and {MAX_TOPUP} pesewas"
        )));
    }

    let reference = transaction_service::generate_reference();
    let topup = sqlx::query_as::<_, WalletTopup>(
        "INSERT INTO wallet_topups (user_id, reference, amount) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(auth.user_id)
    .bind(&reference)
    .bind(amount)
    .fetch_one(&state.pool)
    .await?;

    let payment = match state
        .paystack
        .initialize(
            &auth.email,
            amount,
            &reference,
            json!({ "purpose": "wallet_topup", "user_id": auth.user_id }),
        )
        .await
    {
        Ok(payment) => payment,
        Err(err) => {
            mark_failed(&state.pool, &topup).await?;
            return Err(err.into());
        }
    };

    tracing::info!(reference = %reference, user_id = %auth.user_id, amount, "top-up started");

    Ok(TopupResponse {
        reference,
        amount,
        authorization_url: payment.authorization_url,
    })
}

pub async fn get_topup(pool: &DbPool, reference: &str) -> Result<Option<WalletTopup>, AppError> {
    let topup = sqlx::query_as::<_, WalletTopup>("SELECT * FROM wallet_topups WHERE reference = $1")
        .bind(reference)
        .fetch_optional(pool)
        .await?;
    Ok(topup)
}

pub async fn list_topups(pool: &DbPool, user_id: uuid::Uuid) -> Result<Vec<WalletTopup>, AppError> {
    let topups = sqlx::query_as::<_, WalletTopup>(
        "SELECT * FROM wallet_topups WHERE user_id = $1 ORDER BY created_at DESC LIMIT 100",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(topups)
}

/// Credit the wallet once Paystack confirms the charge. Safe to repeat.
///
/// A top-up that was given up on still gets credited when its charge later
/// succeeds; the ledger entry is keyed by the reference, so it posts once.
pub async fn confirm_topup(
    state: &AppState,
    topup: WalletTopup,
) -> Result<PaymentStatusResponse, AppError> {
    if topup.status == TopupStatus::Success {
        return Ok(topup_status(&topup.reference, topup.status));
    }

    let payment = state.paystack.verify(&topup.reference).await?;

    let status = match checkout_service::check_charge(&payment, topup.amount) {
        ChargeCheck::Paid => {
            if topup.status == TopupStatus::Failed {
                tracing::error!(
                    reference = %topup.reference,
                    amount = topup.amount,
                    "charge succeeded after the top-up was failed, crediting"
                );
            }
            credit(state, &topup).await?;
            TopupStatus::Success
        }
        ChargeCheck::Failed(reason) if payment.status == ChargeStatus::Success => {
            tracing::error!(reference = %topup.reference, reason = %reason, "top-up charge does not match, refunding");
            mark_failed(&state.pool, &topup).await?;
            if let Err(err) = state.paystack.refund(&topup.reference, None).await {
                tracing::error!(reference = %topup.reference, error = %err, "top-up refund failed");
            }
            TopupStatus::Failed
        }
        ChargeCheck::Failed(reason) => {
            if topup.status == TopupStatus::Pending {
                tracing::warn!(reference = %topup.reference, reason = %reason, "top-up failed");
                mark_failed(&state.pool, &topup).await?;
            }
            TopupStatus::Failed
        }
        ChargeCheck::Pending => topup.status,
    };

    Ok(topup_status(&topup.reference, status))
}

async fn credit(state: &AppState, topup: &WalletTopup) -> Result<(), AppError> {
    let mut tx = state.pool.begin().await?;
    let claimed: Option<uuid::Uuid> = sqlx::query_scalar(
        r#"
        UPDATE wallet_topups SET status = 'success', completed_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'failed')
        RETURNING id
        "#,
    )
    .bind(topup.id)
    .fetch_optional(&mut *tx)
    .await?;

    if claimed.is_some() {
        ledger_service::post(
            &mut tx,
            Posting {
                user_id: topup.user_id,
                account: LedgerAccount::Wallet,
                kind: LedgerKind::Topup,
                amount: topup.amount,
                reference: &topup.reference,
                description: Some("Wallet top-up".to_string()),
            },
        )
        .await?;
        tracing::info!(reference = %topup.reference, amount = topup.amount, "wallet topped up");
    }
    tx.commit().await?;
    Ok(())
}

/// Give up on a pending top-up.
pub async fn mark_failed(pool: &DbPool, topup: &WalletTopup) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE wallet_topups SET status = 'failed', completed_at = NOW() WHERE id = $1 AND status = 'pending'",
    )
    .bind(topup.id)
    .execute(pool)
    .await?;
    Ok(())
}

fn topup_status(reference: &str, status: TopupStatus) -> PaymentStatusResponse {
    PaymentStatusResponse {
        reference: reference.to_string(),
        kind: "topup",
        status: status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::user::Role,
        test_support::{ScriptedProvider, StubPaystack, app_state, balance, insert_user},
    };
    use sqlx::PgPool;

    async fn insert_topup(pool: &PgPool, user_id: uuid::Uuid, status: TopupStatus) -> WalletTopup {
        sqlx::query_as::<_, WalletTopup>(
            "INSERT INTO wallet_topups (user_id, reference, amount, status) VALUES ($1, $2, 1000, $3) RETURNING *",
        )
        .bind(user_id)
        .bind(transaction_service::generate_reference())
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn charge_after_expiry_credits_wallet_once(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = app_state(pool.clone(), &stub, ScriptedProvider::new(vec![]), |_| {}).await;
        let user = insert_user(&pool, Role::Admin, None).await;
        let topup = insert_topup(&pool, user.id, TopupStatus::Failed).await;
        stub.set_charge(&topup.reference, "success", 1000);

        let confirmed = checkout_service::confirm_payment(&state, &topup.reference)
            .await
            .unwrap();
        checkout_service::confirm_payment(&state, &topup.reference)
            .await
            .unwrap();

        assert_eq!(confirmed.status, "success");
        assert_eq!(balance(&pool, user.id, LedgerAccount::Wallet).await, 1000);
        let stored = get_topup(&pool, &topup.reference).await.unwrap().unwrap();
        assert_eq!(stored.status, TopupStatus::Success);
        assert!(stub.refunds().is_empty());
    }

    #[sqlx::test]
    async fn pending_topup_is_credited(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = app_state(pool.clone(), &stub, ScriptedProvider::new(vec![]), |_| {}).await;
        let user = insert_user(&pool, Role::Admin, None).await;
        let topup = insert_topup(&pool, user.id, TopupStatus::Pending).await;
        stub.set_charge(&topup.reference, "success", 1000);

        let confirmed = confirm_topup(&state, topup).await.unwrap();

        assert_eq!(confirmed.status, "success");
        assert_eq!(balance(&pool, user.id, LedgerAccount::Wallet).await, 1000);
    }

    #[sqlx::test]
    async fn mismatched_topup_charge_is_refunded(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = app_state(pool.clone(), &stub, ScriptedProvider::new(vec![]), |_| {}).await;
        let user = insert_user(&pool, Role::Admin, None).await;
        let topup = insert_topup(&pool, user.id, TopupStatus::Pending).await;
        stub.set_charge(&topup.reference, "success", 900);

        let reference = topup.reference.clone();
        let confirmed = confirm_topup(&state, topup).await.unwrap();

        assert_eq!(confirmed.status, "failed");
        assert_eq!(balance(&pool, user.id, LedgerAccount::Wallet).await, 0);
        assert_eq!(stub.refunds(), vec![reference.clone()]);

        // Paystack now reports the charge reversed; nothing more happens
        checkout_service::confirm_payment(&state, &reference).await.unwrap();
        assert_eq!(stub.refunds().len(), 1);
    }
}
