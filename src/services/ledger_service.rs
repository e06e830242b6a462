//! Ledger service - every balance mutation goes through here.
//!
//! # Guarantees
//!
//! - The user row is locked (`FOR UPDATE`) before its balance is read, so
//!   concurrent purchases and credits serialize per user.
//! - Balances never go negative: the check happens under the lock and is
//!   backed by a table CHECK constraint.
//! - Each mutation writes a `ledger_entries` row with the resulting balance.
//!   Entries are unique per `(user, account, kind, reference)`; posting the
//!   same entry twice is a no-op, which is what makes top-up confirmation,
//!   refunds and commission credits idempotent.
//!
//! Callers pass an open database transaction so the ledger entry commits or
//! rolls back together with the business change that caused it.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::ledger::{LedgerAccount, LedgerDrift, LedgerEntry, LedgerKind, LedgerQuery},
};

/// A balance movement to apply.
#[derive(Debug, Clone)]
pub struct Posting<'a> {
    pub user_id: Uuid,
    pub account: LedgerAccount,
    pub kind: LedgerKind,
    /// Positive credits, negative debits.
    pub amount: i64,
    pub reference: &'a str,
    pub description: Option<String>,
}

/// Apply a posting inside the caller's transaction.
///
/// Returns `Ok(None)` when an identical entry already exists (nothing changes).
///
/// # Errors
///
/// - `NotFound`: user doesn't exist
/// - `InsufficientBalance`: the debit would take the balance below zero
/// - `InvalidRequest`: zero amount
pub async fn post(
    conn: &mut PgConnection,
    posting: Posting<'_>,
) -> Result<Option<LedgerEntry>, AppError> {
    if posting.amount == 0 {
        return Err(AppError::InvalidRequest(
            "Ledger amount must not be zero".to_string(),
        ));
    }

    let column = posting.account.column();

    // Lock the user row for the rest of the transaction
    let balance: i64 = sqlx::query_scalar(&format!(
        "SELECT {column} FROM users WHERE id = $1 FOR UPDATE"
    ))
    .bind(posting.user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("User"))?;

    let balance_after = balance + posting.amount;
    if balance_after < 0 {
        return Err(AppError::InsufficientBalance);
    }

    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO ledger_entries (user_id, account, kind, amount, balance_after, reference, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, account, kind, reference) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(posting.user_id)
    .bind(posting.account)
    .bind(posting.kind)
    .bind(posting.amount)
    .bind(balance_after)
    .bind(posting.reference)
    .bind(&posting.description)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(entry) = entry else {
        tracing::debug!(
            user_id = %posting.user_id,
            account = %posting.account,
            kind = %posting.kind,
            reference = posting.reference,
            "ledger entry already posted"
        );
        return Ok(None);
    };

    sqlx::query(&format!(
        "UPDATE users SET {column} = $1, updated_at = NOW() WHERE id = $2"
    ))
    .bind(balance_after)
    .bind(posting.user_id)
    .execute(&mut *conn)
    .await?;

    Ok(Some(entry))
}

/// Move `amount` between two balances of the same user (e.g. profit → held).
pub async fn transfer_between(
    conn: &mut PgConnection,
    user_id: Uuid,
    from: (LedgerAccount, LedgerKind),
    to: (LedgerAccount, LedgerKind),
    amount: i64,
    reference: &str,
) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }

    post(
        conn,
        Posting {
            user_id,
            account: from.0,
            kind: from.1,
            amount: -amount,
            reference,
            description: None,
        },
    )
    .await?;

    post(
        conn,
        Posting {
            user_id,
            account: to.0,
            kind: to.1,
            amount,
            reference,
            description: None,
        },
    )
    .await?;

    Ok(())
}

/// List a user's ledger entries, newest first.
pub async fn list_entries(
    pool: &DbPool,
    user_id: Uuid,
    query: &LedgerQuery,
) -> Result<Vec<LedgerEntry>, AppError> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT * FROM ledger_entries
        WHERE user_id = $1 AND ($2::TEXT IS NULL OR account = $2)
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user_id)
    .bind(query.account)
    .bind(query.limit.clamp(1, 200))
    .bind(query.offset.max(0))
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Users whose stored balances disagree with their ledger.
///
/// An empty result means every balance column equals the sum of its entries.
pub async fn ledger_drift(pool: &DbPool) -> Result<Vec<LedgerDrift>, AppError> {
    let mut drift = Vec::new();

    for account in LedgerAccount::ALL {
        let column = account.column();
        let rows = sqlx::query_as::<_, LedgerDrift>(&format!(
            r#"
            SELECT u.id AS user_id,
                   u.email,
                   $1::TEXT AS account,
                   u.{column} AS stored_balance,
                   COALESCE(SUM(l.amount), 0)::BIGINT AS ledger_balance
            FROM users u
            LEFT JOIN ledger_entries l ON l.user_id = u.id AND l.account = $1
            GROUP BY u.id
            HAVING u.{column} <> COALESCE(SUM(l.amount), 0)
            "#
        ))
        .bind(*account)
        .fetch_all(pool)
        .await?;

        drift.extend(rows);
    }

    if !drift.is_empty() {
        tracing::warn!(count = drift.len(), "ledger drift detected");
    }

    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::user::Role,
        test_support::{balance, credit, insert_user},
    };
    use sqlx::PgPool;

    fn posting(user_id: Uuid, amount: i64, reference: &str) -> Posting<'_> {
        Posting {
            user_id,
            account: LedgerAccount::Wallet,
            kind: LedgerKind::Purchase,
            amount,
            reference,
            description: None,
        }
    }

    #[sqlx::test]
    async fn debit_below_zero_is_refused(pool: PgPool) {
        let user = insert_user(&pool, Role::Admin, None).await;
        credit(&pool, user.id, LedgerAccount::Wallet, 300).await;

        let mut tx = pool.begin().await.unwrap();
        let result = post(&mut tx, posting(user.id, -301, "DB-OVER")).await;
        assert!(matches!(result, Err(AppError::InsufficientBalance)));
        drop(tx);

        assert_eq!(balance(&pool, user.id, LedgerAccount::Wallet).await, 300);
    }

    #[sqlx::test]
    async fn same_entry_posts_once(pool: PgPool) {
        let user = insert_user(&pool, Role::Admin, None).await;
        credit(&pool, user.id, LedgerAccount::Wallet, 1_000).await;

        let mut tx = pool.begin().await.unwrap();
        let first = post(&mut tx, posting(user.id, -400, "DB-ONCE")).await.unwrap();
        let second = post(&mut tx, posting(user.id, -400, "DB-ONCE")).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(first.map(|e| e.balance_after), Some(600));
        assert!(second.is_none());
        assert_eq!(balance(&pool, user.id, LedgerAccount::Wallet).await, 600);
        assert!(ledger_drift(&pool).await.unwrap().is_empty());
    }

    #[sqlx::test]
    async fn transfer_moves_between_balances(pool: PgPool) {
        let user = insert_user(&pool, Role::Admin, None).await;
        credit(&pool, user.id, LedgerAccount::Profit, 500).await;

        let mut tx = pool.begin().await.unwrap();
        transfer_between(
            &mut tx,
            user.id,
            (LedgerAccount::Profit, LedgerKind::WithdrawalHold),
            (LedgerAccount::Held, LedgerKind::WithdrawalHold),
            200,
            "W-1",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(balance(&pool, user.id, LedgerAccount::Profit).await, 300);
        assert_eq!(balance(&pool, user.id, LedgerAccount::Held).await, 200);
    }

    #[sqlx::test]
    async fn drift_reports_balances_changed_behind_the_ledger(pool: PgPool) {
        let user = insert_user(&pool, Role::Admin, None).await;
        sqlx::query("UPDATE users SET wallet_balance = 50 WHERE id = $1")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();

        let drift = ledger_drift(&pool).await.unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].stored_balance, 50);
        assert_eq!(drift[0].ledger_balance, 0);
    }
}
