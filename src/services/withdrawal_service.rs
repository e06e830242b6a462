//! Profit withdrawals.
//!
//! Requesting a withdrawal moves the amount from the profit balance to the
//! held balance, so it cannot be spent twice while an admin reviews it.
//! Rejection releases it back to profit; payment removes it from held.

use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        ledger::{LedgerAccount, LedgerKind},
        withdrawal::{ListWithdrawalsQuery, Withdrawal, WithdrawalRequest, WithdrawalStatus},
    },
    services::ledger_service::{self, Posting},
    validation,
};

/// 1 GHS.
pub const MIN_WITHDRAWAL: i64 = 100;

pub async fn request_withdrawal(
    pool: &DbPool,
    auth: &AuthContext,
    request: WithdrawalRequest,
) -> Result<Withdrawal, AppError> {
    if request.amount < MIN_WITHDRAWAL {
        return Err(AppError::InvalidRequest(format!(
            "Minimum withdrawal is {MIN_WITHDRAWAL} pesewas"
        )));
    }
    let account_name = validation::require_text(&request.account_name, "account_name", 120)?;
    let account_number = validation::require_text(&request.account_number, "account_number", 40)?;
    let provider = validation::require_text(&request.provider, "provider", 60)?;

    let mut tx = pool.begin().await?;

    let withdrawal = sqlx::query_as::<_, Withdrawal>(
        r#"
        INSERT INTO withdrawals (user_id, amount, method, account_name, account_number, provider)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(auth.user_id)
    .bind(request.amount)
    .bind(request.method)
    .bind(account_name)
    .bind(account_number)
    .bind(provider)
    .fetch_one(&mut *tx)
    .await?;

    ledger_service::transfer_between(
        &mut tx,
        auth.user_id,
        (LedgerAccount::Profit, LedgerKind::WithdrawalHold),
        (LedgerAccount::Held, LedgerKind::WithdrawalHold),
        withdrawal.amount,
        &withdrawal.id.to_string(),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        withdrawal_id = %withdrawal.id,
        user_id = %auth.user_id,
        amount = withdrawal.amount,
        "withdrawal requested"
    );
    Ok(withdrawal)
}

/// Own withdrawals, or everyone's for admins.
pub async fn list_withdrawals(
    pool: &DbPool,
    auth: &AuthContext,
    query: &ListWithdrawalsQuery,
) -> Result<Vec<Withdrawal>, AppError> {
    let withdrawals = sqlx::query_as::<_, Withdrawal>(
        r#"
        SELECT * FROM withdrawals
        WHERE ($1 OR user_id = $2) AND ($3::TEXT IS NULL OR status = $3)
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(auth.is_admin())
    .bind(auth.user_id)
    .bind(query.status)
    .fetch_all(pool)
    .await?;
    Ok(withdrawals)
}

pub async fn approve(pool: &DbPool, id: Uuid, note: Option<String>) -> Result<Withdrawal, AppError> {
    review(pool, id, WithdrawalStatus::Approved, note).await
}

pub async fn reject(pool: &DbPool, id: Uuid, note: Option<String>) -> Result<Withdrawal, AppError> {
    review(pool, id, WithdrawalStatus::Rejected, note).await
}

pub async fn mark_paid(pool: &DbPool, id: Uuid, note: Option<String>) -> Result<Withdrawal, AppError> {
    review(pool, id, WithdrawalStatus::Paid, note).await
}

async fn review(
    pool: &DbPool,
    id: Uuid,
    to: WithdrawalStatus,
    note: Option<String>,
) -> Result<Withdrawal, AppError> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Withdrawal"))?;

    if !current.status.can_transition_to(to) {
        return Err(AppError::Conflict(format!(
            "Cannot move withdrawal from {} to {to}",
            current.status
        )));
    }

    let reference = current.id.to_string();
    match to {
        WithdrawalStatus::Rejected => {
            ledger_service::transfer_between(
                &mut tx,
                current.user_id,
                (LedgerAccount::Held, LedgerKind::WithdrawalRelease),
                (LedgerAccount::Profit, LedgerKind::WithdrawalRelease),
                current.amount,
                &reference,
            )
            .await?;
        }
        WithdrawalStatus::Paid => {
            ledger_service::post(
                &mut tx,
                Posting {
                    user_id: current.user_id,
                    account: LedgerAccount::Held,
                    kind: LedgerKind::WithdrawalPaid,
                    amount: -current.amount,
                    reference: &reference,
                    description: Some(format!("Paid out via {}", current.method)),
                },
            )
            .await?;
        }
        WithdrawalStatus::Approved | WithdrawalStatus::Pending => {}
    }

    let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    let withdrawal = sqlx::query_as::<_, Withdrawal>(
        r#"
        UPDATE withdrawals
        SET status = $2, admin_note = COALESCE($3, admin_note), updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(to)
    .bind(note)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(withdrawal_id = %id, from = %current.status, to = %to, "withdrawal reviewed");
    Ok(withdrawal)
}
