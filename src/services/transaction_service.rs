//! Transaction service - state transitions, commissions and refunds.
//!
//! # State changes
//!
//! Every status change goes through [`advance`], which locks the row
//! (`FOR UPDATE`), checks the state machine, and applies the change. Asking
//! for the status a transaction already has is a successful no-op, so the
//! webhook, the verify endpoint, the dispatcher and the reconciler can all
//! race on the same reference without double-applying side effects: only the
//! caller that observes `changed == true` runs them.

use chrono::Utc;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        bundle::Voucher,
        ledger::{LedgerAccount, LedgerKind},
        transaction::{
            Commission, CommissionStatus, ListOrdersQuery, PaymentChannel, Transaction,
            TransactionStatus,
        },
    },
    services::{
        ledger_service::{self, Posting},
        paystack::{ChargeStatus, PaystackClient},
        pricing::CommissionShare,
    },
};

/// Result of [`advance`].
#[derive(Debug)]
pub struct Advanced {
    pub transaction: Transaction,
    /// False when the transaction already had the requested status.
    pub changed: bool,
}

/// Optional column updates applied together with a status change.
#[derive(Debug, Default)]
pub struct Patch {
    pub last_error: Option<String>,
    pub provider_reference: Option<String>,
}

/// Generate a payment/dispatch reference, e.g. `DB250101A1B2C3D4E5`.
pub fn generate_reference() -> String {
    let bytes: [u8; 5] = rand::random();
    format!(
        "DB{}{}",
        Utc::now().format("%y%m%d"),
        hex::encode_upper(bytes)
    )
}

/// Move the transaction `reference` to `to` inside the caller's transaction.
///
/// # Errors
///
/// - `NotFound`: unknown reference
/// - `InvalidTransition`: the state machine forbids the move
pub async fn advance(
    conn: &mut PgConnection,
    reference: &str,
    to: TransactionStatus,
    patch: Patch,
) -> Result<Advanced, AppError> {
    let current = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE reference = $1 FOR UPDATE",
    )
    .bind(reference)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Transaction"))?;

    if current.status == to {
        return Ok(Advanced {
            transaction: current,
            changed: false,
        });
    }

    if !current.status.can_transition_to(to) {
        return Err(AppError::InvalidTransition {
            from: current.status,
            to,
        });
    }

    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $2,
            updated_at = NOW(),
            retry_at = NULL,
            paid_at = CASE WHEN $2 = 'paid' THEN NOW() ELSE paid_at END,
            delivered_at = CASE WHEN $2 = 'delivered' THEN NOW() ELSE delivered_at END,
            last_error = COALESCE($3, last_error),
            provider_reference = COALESCE($4, provider_reference)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(current.id)
    .bind(to)
    .bind(patch.last_error)
    .bind(patch.provider_reference)
    .fetch_one(&mut *conn)
    .await?;

    tracing::info!(
        reference = %transaction.reference,
        from = %current.status,
        to = %to,
        "transaction status changed"
    );

    Ok(Advanced {
        transaction,
        changed: true,
    })
}

/// Record the pending commission plan for a freshly created transaction.
pub async fn plan_commissions(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    shares: &[CommissionShare],
) -> Result<(), AppError> {
    for share in shares {
        sqlx::query(
            r#"
            INSERT INTO commissions (transaction_id, beneficiary_id, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (transaction_id, beneficiary_id) DO NOTHING
            "#,
        )
        .bind(transaction_id)
        .bind(share.beneficiary_id)
        .bind(share.amount)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Credit every pending commission of a delivered transaction to profit balances.
///
/// Beneficiary rows are locked in id order so that deliveries sharing an
/// upline cannot deadlock each other.
pub async fn settle_commissions(
    conn: &mut PgConnection,
    transaction: &Transaction,
) -> Result<i64, AppError> {
    let pending = sqlx::query_as::<_, Commission>(
        r#"
        SELECT id, beneficiary_id, amount
        FROM commissions
        WHERE transaction_id = $1 AND status = 'pending'
        ORDER BY beneficiary_id
        FOR UPDATE
        "#,
    )
    .bind(transaction.id)
    .fetch_all(&mut *conn)
    .await?;

    let mut total = 0;
    for commission in pending {
        ledger_service::post(
            conn,
            Posting {
                user_id: commission.beneficiary_id,
                account: LedgerAccount::Profit,
                kind: LedgerKind::Commission,
                amount: commission.amount,
                reference: &transaction.reference,
                description: Some("Commission on delivered order".to_string()),
            },
        )
        .await?;

        sqlx::query("UPDATE commissions SET status = $2 WHERE id = $1")
            .bind(commission.id)
            .bind(CommissionStatus::Credited)
            .execute(&mut *conn)
            .await?;

        total += commission.amount;
    }

    Ok(total)
}

pub async fn void_commissions(conn: &mut PgConnection, transaction_id: Uuid) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE commissions SET status = $2 WHERE transaction_id = $1 AND status = 'pending'",
    )
    .bind(transaction_id)
    .bind(CommissionStatus::Void)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Mark a transaction delivered and credit its commissions inside the caller's transaction.
pub async fn deliver(
    conn: &mut PgConnection,
    reference: &str,
    provider_reference: Option<String>,
) -> Result<Transaction, AppError> {
    let advanced = advance(
        conn,
        reference,
        TransactionStatus::Delivered,
        Patch {
            last_error: None,
            provider_reference,
        },
    )
    .await?;

    if advanced.changed {
        let credited = settle_commissions(conn, &advanced.transaction).await?;
        tracing::info!(reference, commission = credited, "order delivered");
    }

    Ok(advanced.transaction)
}

pub async fn complete_delivery(
    pool: &DbPool,
    reference: &str,
    provider_reference: Option<String>,
) -> Result<Transaction, AppError> {
    let mut tx = pool.begin().await?;
    let transaction = deliver(&mut tx, reference, provider_reference).await?;
    tx.commit().await?;
    Ok(transaction)
}

/// Fail a transaction (voiding commissions) and refund it if money was taken.
pub async fn fail_and_refund(
    pool: &DbPool,
    paystack: &PaystackClient,
    reference: &str,
    reason: &str,
) -> Result<Transaction, AppError> {
    let mut tx = pool.begin().await?;
    let advanced = advance(
        &mut tx,
        reference,
        TransactionStatus::Failed,
        Patch {
            last_error: Some(reason.to_string()),
            provider_reference: None,
        },
    )
    .await?;
    if advanced.changed {
        void_commissions(&mut tx, advanced.transaction.id).await?;
    }
    tx.commit().await?;

    tracing::warn!(reference, reason, "order failed");

    if advanced.transaction.paid_at.is_some() {
        return refund(pool, paystack, reference).await;
    }
    Ok(advanced.transaction)
}

/// Record that Paystack took money for a Paystack order that already failed
/// without payment, so that [`refund`] will send it back.
///
/// Returns `None` when the order is not in that situation.
pub async fn record_late_charge(
    pool: &DbPool,
    reference: &str,
    note: &str,
) -> Result<Option<Transaction>, AppError> {
    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET paid_at = NOW(), last_error = $2, updated_at = NOW()
        WHERE reference = $1
          AND status = 'failed'
          AND paid_at IS NULL
          AND payment_channel = 'paystack'
        RETURNING *
        "#,
    )
    .bind(reference)
    .bind(note)
    .fetch_optional(pool)
    .await?;

    Ok(transaction)
}

/// Return the money of a failed, paid transaction and mark it refunded.
///
/// Wallet purchases are credited back to the buyer's wallet; Paystack
/// payments are refunded through the Paystack API. A Paystack failure leaves
/// the transaction `failed` for the reconciler to retry.
pub async fn refund(
    pool: &DbPool,
    paystack: &PaystackClient,
    reference: &str,
) -> Result<Transaction, AppError> {
    let transaction = get_by_reference(pool, reference)
        .await?
        .ok_or(AppError::NotFound("Transaction"))?;

    if transaction.status == TransactionStatus::Refunded {
        return Ok(transaction);
    }
    if transaction.status != TransactionStatus::Failed || transaction.paid_at.is_none() {
        return Err(AppError::InvalidTransition {
            from: transaction.status,
            to: TransactionStatus::Refunded,
        });
    }

    if transaction.payment_channel == PaymentChannel::Paystack {
        if let Err(err) = paystack.refund(reference, None).await {
            // A charge refunded earlier shows up as reversed
            let reversed = matches!(
                paystack.verify(reference).await,
                Ok(payment) if payment.status == ChargeStatus::Reversed
            );
            if !reversed {
                tracing::error!(reference, error = %err, "paystack refund failed");
                return Err(err.into());
            }
        }
    }

    let mut tx = pool.begin().await?;
    let advanced = advance(&mut tx, reference, TransactionStatus::Refunded, Patch::default()).await?;

    if advanced.changed && transaction.payment_channel == PaymentChannel::Wallet {
        let buyer_id = transaction
            .buyer_id
            .ok_or_else(|| AppError::Internal(format!("wallet order {reference} has no buyer")))?;
        ledger_service::post(
            &mut tx,
            Posting {
                user_id: buyer_id,
                account: LedgerAccount::Wallet,
                kind: LedgerKind::Refund,
                amount: transaction.amount,
                reference,
                description: Some("Refund for failed order".to_string()),
            },
        )
        .await?;
    }
    tx.commit().await?;

    tracing::info!(reference, amount = transaction.amount, "order refunded");
    Ok(advanced.transaction)
}

/// Get transaction by reference.
pub async fn get_by_reference(
    pool: &DbPool,
    reference: &str,
) -> Result<Option<Transaction>, AppError> {
    let transaction =
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE reference = $1")
            .bind(reference)
            .fetch_optional(pool)
            .await?;

    Ok(transaction)
}

/// Fetch a transaction the caller may see: their own purchase, a sale on their
/// storefront, or anything for admins. Others get `NotFound`.
pub async fn get_visible(
    pool: &DbPool,
    auth: &AuthContext,
    reference: &str,
) -> Result<Transaction, AppError> {
    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT t.* FROM transactions t
        LEFT JOIN storefronts s ON s.id = t.storefront_id
        WHERE t.reference = $1
          AND ($2 OR t.buyer_id = $3 OR s.owner_id = $3)
        "#,
    )
    .bind(reference)
    .bind(auth.is_admin())
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Transaction"))?;

    Ok(transaction)
}

/// List orders visible to the caller, newest first.
pub async fn list_visible(
    pool: &DbPool,
    auth: &AuthContext,
    query: &ListOrdersQuery,
) -> Result<Vec<Transaction>, AppError> {
    let transactions = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT t.* FROM transactions t
        LEFT JOIN storefronts s ON s.id = t.storefront_id
        WHERE ($1 OR t.buyer_id = $2 OR s.owner_id = $2)
          AND ($3::TEXT IS NULL OR t.status = $3)
        ORDER BY t.created_at DESC
        LIMIT $4 OFFSET $5
        "#,
    )
    .bind(auth.is_admin())
    .bind(auth.user_id)
    .bind(query.status)
    .bind(query.limit.clamp(1, 200))
    .bind(query.offset.max(0))
    .fetch_all(pool)
    .await?;

    Ok(transactions)
}

/// Vouchers handed out for a transaction.
pub async fn vouchers_for(pool: &DbPool, transaction_id: Uuid) -> Result<Vec<Voucher>, AppError> {
    let vouchers = sqlx::query_as::<_, Voucher>(
        "SELECT serial, pin FROM vouchers WHERE transaction_id = $1 ORDER BY serial",
    )
    .bind(transaction_id)
    .fetch_all(pool)
    .await?;

    Ok(vouchers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{bundle::Bundle, user::Role},
        test_support::{
            StubPaystack, balance, credit, data_bundle, insert_chain, insert_order, reload,
        },
    };
    use sqlx::PgPool;

    async fn paystack_client(stub: &StubPaystack) -> PaystackClient {
        PaystackClient::new(&stub.serve().await, "sk_test", None).unwrap()
    }

    async fn commission_status(pool: &DbPool, transaction_id: Uuid) -> Vec<(Uuid, String)> {
        sqlx::query_as(
            "SELECT beneficiary_id, status FROM commissions WHERE transaction_id = $1 ORDER BY beneficiary_id",
        )
        .bind(transaction_id)
        .fetch_all(pool)
        .await
        .unwrap()
    }

    async fn dispatching_wallet_order(pool: &DbPool, bundle: &Bundle, buyer: Uuid) -> Transaction {
        insert_order(
            pool,
            bundle,
            Some(buyer),
            PaymentChannel::Wallet,
            TransactionStatus::Dispatching,
            true,
        )
        .await
    }

    #[sqlx::test]
    async fn advance_is_compare_and_set(pool: PgPool) {
        let bundle = data_bundle(&pool).await;
        let order = insert_order(
            &pool,
            &bundle,
            None,
            PaymentChannel::Paystack,
            TransactionStatus::Initiated,
            false,
        )
        .await;

        let mut tx = pool.begin().await.unwrap();
        let first = advance(&mut tx, &order.reference, TransactionStatus::AwaitingPayment, Patch::default())
            .await
            .unwrap();
        let again = advance(&mut tx, &order.reference, TransactionStatus::AwaitingPayment, Patch::default())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(first.changed);
        assert!(!again.changed);

        let mut tx = pool.begin().await.unwrap();
        let skipped = advance(&mut tx, &order.reference, TransactionStatus::Delivered, Patch::default()).await;
        assert!(matches!(
            skipped,
            Err(AppError::InvalidTransition {
                from: TransactionStatus::AwaitingPayment,
                to: TransactionStatus::Delivered
            })
        ));
        drop(tx);

        assert_eq!(
            reload(&pool, &order.reference).await.status,
            TransactionStatus::AwaitingPayment
        );
    }

    #[sqlx::test]
    async fn unknown_reference_is_not_found(pool: PgPool) {
        let mut tx = pool.begin().await.unwrap();
        let result = advance(&mut tx, "DB-NOPE", TransactionStatus::Paid, Patch::default()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[sqlx::test]
    async fn delivery_credits_commissions_once(pool: PgPool) {
        let chain = insert_chain(&pool, &[Role::Admin, Role::Dealer, Role::Agent]).await;
        let (dealer, agent) = (&chain[1], &chain[2]);
        let bundle = data_bundle(&pool).await;
        let order = dispatching_wallet_order(&pool, &bundle, agent.id).await;

        let mut tx = pool.begin().await.unwrap();
        plan_commissions(
            &mut tx,
            order.id,
            &[CommissionShare {
                beneficiary_id: dealer.id,
                amount: 20,
            }],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let delivered = complete_delivery(&pool, &order.reference, Some("P-1".to_string()))
            .await
            .unwrap();
        complete_delivery(&pool, &order.reference, None).await.unwrap();

        assert_eq!(delivered.status, TransactionStatus::Delivered);
        assert_eq!(delivered.provider_reference.as_deref(), Some("P-1"));
        assert!(delivered.delivered_at.is_some());
        assert_eq!(balance(&pool, dealer.id, LedgerAccount::Profit).await, 20);
        assert_eq!(
            commission_status(&pool, order.id).await,
            vec![(dealer.id, "credited".to_string())]
        );
    }

    #[sqlx::test]
    async fn settlement_credits_every_beneficiary(pool: PgPool) {
        let chain = insert_chain(&pool, &[Role::Admin, Role::Master, Role::Dealer, Role::Agent]).await;
        let bundle = data_bundle(&pool).await;
        let order = dispatching_wallet_order(&pool, &bundle, chain[3].id).await;

        let shares = [
            CommissionShare { beneficiary_id: chain[2].id, amount: 20 },
            CommissionShare { beneficiary_id: chain[1].id, amount: 40 },
        ];
        let mut tx = pool.begin().await.unwrap();
        plan_commissions(&mut tx, order.id, &shares).await.unwrap();
        tx.commit().await.unwrap();

        complete_delivery(&pool, &order.reference, None).await.unwrap();

        let mut credited: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM ledger_entries WHERE reference = $1 AND kind = 'commission' ORDER BY created_at, id",
        )
        .bind(&order.reference)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(credited.len(), 2);
        credited.sort();
        let mut expected = vec![chain[1].id, chain[2].id];
        expected.sort();
        assert_eq!(credited, expected);
        assert_eq!(balance(&pool, chain[1].id, LedgerAccount::Profit).await, 40);
        assert_eq!(balance(&pool, chain[2].id, LedgerAccount::Profit).await, 20);
    }

    #[sqlx::test]
    async fn failed_wallet_order_is_refunded_to_the_wallet(pool: PgPool) {
        let chain = insert_chain(&pool, &[Role::Admin, Role::Dealer, Role::Agent]).await;
        let (dealer, agent) = (&chain[1], &chain[2]);
        credit(&pool, agent.id, LedgerAccount::Wallet, 100).await;
        let bundle = data_bundle(&pool).await;
        let order = dispatching_wallet_order(&pool, &bundle, agent.id).await;

        let mut tx = pool.begin().await.unwrap();
        plan_commissions(
            &mut tx,
            order.id,
            &[CommissionShare {
                beneficiary_id: dealer.id,
                amount: 20,
            }],
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let stub = StubPaystack::default();
        let paystack = paystack_client(&stub).await;
        let refunded = fail_and_refund(&pool, &paystack, &order.reference, "provider said no")
            .await
            .unwrap();
        // A second refund changes nothing
        refund(&pool, &paystack, &order.reference).await.unwrap();

        assert_eq!(refunded.status, TransactionStatus::Refunded);
        assert_eq!(refunded.last_error.as_deref(), Some("provider said no"));
        assert_eq!(balance(&pool, agent.id, LedgerAccount::Wallet).await, 600);
        assert_eq!(balance(&pool, dealer.id, LedgerAccount::Profit).await, 0);
        assert_eq!(
            commission_status(&pool, order.id).await,
            vec![(dealer.id, "void".to_string())]
        );
        assert!(stub.refunds().is_empty());
    }

    #[sqlx::test]
    async fn unpaid_orders_fail_without_refund(pool: PgPool) {
        let bundle = data_bundle(&pool).await;
        let order = insert_order(
            &pool,
            &bundle,
            None,
            PaymentChannel::Paystack,
            TransactionStatus::AwaitingPayment,
            false,
        )
        .await;

        let stub = StubPaystack::default();
        let paystack = paystack_client(&stub).await;
        let failed = fail_and_refund(&pool, &paystack, &order.reference, "expired")
            .await
            .unwrap();

        assert_eq!(failed.status, TransactionStatus::Failed);
        assert!(stub.refunds().is_empty());
        assert!(refund(&pool, &paystack, &order.reference).await.is_err());
    }

    #[sqlx::test]
    async fn late_charge_is_only_recorded_on_failed_paystack_orders(pool: PgPool) {
        let bundle = data_bundle(&pool).await;
        let failed = insert_order(
            &pool,
            &bundle,
            None,
            PaymentChannel::Paystack,
            TransactionStatus::Failed,
            false,
        )
        .await;
        let waiting = insert_order(
            &pool,
            &bundle,
            None,
            PaymentChannel::Paystack,
            TransactionStatus::AwaitingPayment,
            false,
        )
        .await;

        let recorded = record_late_charge(&pool, &failed.reference, "late").await.unwrap();
        assert!(recorded.is_some_and(|t| t.paid_at.is_some()));
        assert!(record_late_charge(&pool, &failed.reference, "late").await.unwrap().is_none());
        assert!(record_late_charge(&pool, &waiting.reference, "late").await.unwrap().is_none());
    }

    #[test]
    fn references_are_unique_and_prefixed() {
        let a = generate_reference();
        let b = generate_reference();
        assert!(a.starts_with("DB"));
        assert_eq!(a.len(), 2 + 6 + 10);
        assert!(a.chars().skip(2).all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        assert_ne!(a, b);
    }
}
