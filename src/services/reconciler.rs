//! Periodic reconciliation of payments, deliveries and refunds.
//!
//! Each pass:
//! 1. re-verifies Paystack payments that have been pending for a while, and
//!    expires those that never completed;
//! 2. asks providers about orders stuck in `dispatching` with no retry
//!    scheduled (ambiguous submissions, async deliveries, crashed workers);
//! 3. retries refunds for failed orders whose money was taken.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::{
    error::AppError,
    models::{
        transaction::{Transaction, TransactionStatus},
        wallet::TopupStatus,
    },
    services::{
        checkout_service, dispatcher,
        providers::ProviderStatus,
        transaction_service, wallet_service,
    },
    state::AppState,
};

const BATCH: i64 = 100;

/// Counters of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub payments_checked: usize,
    pub payments_expired: usize,
    pub dispatches_resolved: usize,
    pub refunds_retried: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        *self == ReconcileReport::default()
    }
}

pub async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.reconcile_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        interval_secs = state.config.reconcile_interval_secs,
        "reconciler started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match reconcile_once(&state).await {
            Ok(report) if !report.is_empty() => {
                tracing::info!(
                    payments_checked = report.payments_checked,
                    payments_expired = report.payments_expired,
                    dispatches_resolved = report.dispatches_resolved,
                    refunds_retried = report.refunds_retried,
                    "reconciliation pass"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "reconciliation pass failed"),
        }
    }

    tracing::info!("reconciler stopped");
}

pub async fn reconcile_once(state: &AppState) -> Result<ReconcileReport, AppError> {
    let mut report = ReconcileReport::default();
    reconcile_payments(state, &mut report).await?;
    reconcile_topups(state, &mut report).await?;
    reconcile_dispatches(state, &mut report).await?;
    retry_refunds(state, &mut report).await?;
    Ok(report)
}

async fn reconcile_payments(state: &AppState, report: &mut ReconcileReport) -> Result<(), AppError> {
    let stale: Vec<(String, bool)> = sqlx::query_as(
        r#"
        SELECT reference, created_at < NOW() - make_interval(mins => $2) AS expired
        FROM transactions
        WHERE payment_channel = 'paystack'
          AND status IN ('initiated', 'awaiting_payment')
          AND created_at < NOW() - make_interval(mins => $1)
        ORDER BY created_at
        LIMIT $3
        "#,
    )
    .bind(state.config.payment_stale_minutes as i32)
    .bind(state.config.payment_expiry_minutes as i32)
    .bind(BATCH)
    .fetch_all(&state.pool)
    .await?;

    for (reference, expired) in stale {
        report.payments_checked += 1;
        let status = match checkout_service::confirm_payment(state, &reference).await {
            Ok(confirmed) => Some(confirmed.status),
            Err(e) => {
                tracing::warn!(reference = %reference, error = %e, "payment re-verification failed");
                None
            }
        };

        let still_waiting = status.as_deref().is_none_or(|s| {
            s == TransactionStatus::Initiated.as_str()
                || s == TransactionStatus::AwaitingPayment.as_str()
        });
        if expired && still_waiting {
            match transaction_service::fail_and_refund(
                &state.pool,
                &state.paystack,
                &reference,
                "payment not completed in time",
            )
            .await
            {
                Ok(_) => report.payments_expired += 1,
                Err(e) => {
                    tracing::warn!(reference = %reference, error = %e, "could not expire payment")
                }
            }
        }
    }

    Ok(())
}

async fn reconcile_topups(state: &AppState, report: &mut ReconcileReport) -> Result<(), AppError> {
    let stale: Vec<(String, bool)> = sqlx::query_as(
        r#"
        SELECT reference, created_at < NOW() - make_interval(mins => $2) AS expired
        FROM wallet_topups
        WHERE status = 'pending' AND created_at < NOW() - make_interval(mins => $1)
        ORDER BY created_at
        LIMIT $3
        "#,
    )
    .bind(state.config.payment_stale_minutes as i32)
    .bind(state.config.payment_expiry_minutes as i32)
    .bind(BATCH)
    .fetch_all(&state.pool)
    .await?;

    for (reference, expired) in stale {
        report.payments_checked += 1;
        if let Err(e) = checkout_service::confirm_payment(state, &reference).await {
            tracing::warn!(reference = %reference, error = %e, "top-up re-verification failed");
        }

        if !expired {
            continue;
        }
        let topup = wallet_service::get_topup(&state.pool, &reference).await?;
        if let Some(topup) = topup.filter(|t| t.status == TopupStatus::Pending) {
            wallet_service::mark_failed(&state.pool, &topup).await?;
            report.payments_expired += 1;
        }
    }

    Ok(())
}

async fn reconcile_dispatches(
    state: &AppState,
    report: &mut ReconcileReport,
) -> Result<(), AppError> {
    let stuck = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT * FROM transactions
        WHERE status = 'dispatching'
          AND retry_at IS NULL
          AND updated_at < NOW() - make_interval(mins => $1)
        ORDER BY updated_at
        LIMIT $2
        "#,
    )
    .bind(state.config.dispatch_stale_minutes as i32)
    .bind(BATCH)
    .fetch_all(&state.pool)
    .await?;

    for transaction in stuck {
        match resolve_dispatch(state, &transaction).await {
            Ok(true) => report.dispatches_resolved += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(reference = %transaction.reference, error = %e, "could not resolve dispatch")
            }
        }
    }

    Ok(())
}

/// Settle one stuck order. Returns `false` while the provider is still working on it.
async fn resolve_dispatch(state: &AppState, transaction: &Transaction) -> Result<bool, AppError> {
    let reference = transaction.reference.as_str();

    // Vouchers are local: assignment either committed with the delivery or not at all
    let Some(network) = transaction.network else {
        dispatcher::retry_or_fail(state, transaction, "voucher assignment interrupted").await?;
        return Ok(true);
    };

    let provider = match state.providers.get(network) {
        Ok(provider) => provider,
        Err(e) => {
            dispatcher::retry_or_fail(state, transaction, &e.to_string()).await?;
            return Ok(true);
        }
    };
    let status = provider
        .status(reference)
        .await
        .map_err(|e| AppError::Upstream(format!("{}: {e}", provider.name())))?;

    tracing::info!(reference, provider = provider.name(), status = ?status, "provider status checked");

    match status {
        ProviderStatus::Delivered => {
            transaction_service::complete_delivery(&state.pool, reference, None).await?;
        }
        ProviderStatus::Failed(reason) => {
            transaction_service::fail_and_refund(&state.pool, &state.paystack, reference, &reason)
                .await?;
        }
        ProviderStatus::NotFound => {
            // The provider never saw it, so resubmitting cannot deliver twice
            dispatcher::retry_or_fail(state, transaction, "provider has no record of the order")
                .await?;
        }
        ProviderStatus::Processing => return Ok(false),
    }

    Ok(true)
}

async fn retry_refunds(state: &AppState, report: &mut ReconcileReport) -> Result<(), AppError> {
    let pending: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT reference FROM transactions
        WHERE status = 'failed' AND paid_at IS NOT NULL
        ORDER BY updated_at
        LIMIT $1
        "#,
    )
    .bind(BATCH)
    .fetch_all(&state.pool)
    .await?;

    for reference in pending {
        report.refunds_retried += 1;
        if let Err(e) = transaction_service::refund(&state.pool, &state.paystack, &reference).await {
            tracing::warn!(reference = %reference, error = %e, "refund retry failed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            bundle::Bundle,
            ledger::LedgerAccount,
            transaction::PaymentChannel,
            user::{Role, User},
        },
        test_support::{
            ScriptedProvider, StubPaystack, app_state, balance, checker_bundle, data_bundle,
            insert_order, insert_user, reload,
        },
    };
    use sqlx::PgPool;

    /// Wallet order stuck in `dispatching` after `attempts` tries.
    async fn stuck_order(pool: &PgPool, bundle: &Bundle, buyer: &User, attempts: i32) -> Transaction {
        let order = insert_order(
            pool,
            bundle,
            Some(buyer.id),
            PaymentChannel::Wallet,
            TransactionStatus::Dispatching,
            true,
        )
        .await;
        sqlx::query(
            "UPDATE transactions SET attempts = $2, updated_at = NOW() - INTERVAL '1 hour' WHERE id = $1",
        )
        .bind(order.id)
        .bind(attempts)
        .execute(pool)
        .await
        .unwrap();
        order
    }

    #[sqlx::test]
    async fn order_unknown_to_provider_is_resubmitted(pool: PgPool) {
        let provider = ScriptedProvider::new(vec![]);
        provider.set_status(ProviderStatus::NotFound);
        let state = app_state(pool.clone(), &StubPaystack::default(), provider, |_| {}).await;
        let buyer = insert_user(&pool, Role::Admin, None).await;
        let order = stuck_order(&pool, &data_bundle(&pool).await, &buyer, 1).await;

        let report = reconcile_once(&state).await.unwrap();

        assert_eq!(report.dispatches_resolved, 1);
        let stored = reload(&pool, &order.reference).await;
        assert_eq!(stored.status, TransactionStatus::Dispatching);
        assert!(stored.retry_at.is_some());
        assert_eq!(
            stored.last_error.as_deref(),
            Some("provider has no record of the order")
        );
    }

    #[sqlx::test]
    async fn order_unknown_to_provider_is_refunded_at_max_attempts(pool: PgPool) {
        let provider = ScriptedProvider::new(vec![]);
        provider.set_status(ProviderStatus::NotFound);
        let state = app_state(pool.clone(), &StubPaystack::default(), provider, |_| {}).await;
        let buyer = insert_user(&pool, Role::Admin, None).await;
        let max = state.config.dispatch_max_attempts;
        let order = stuck_order(&pool, &data_bundle(&pool).await, &buyer, max).await;

        reconcile_once(&state).await.unwrap();

        assert_eq!(reload(&pool, &order.reference).await.status, TransactionStatus::Refunded);
        assert_eq!(balance(&pool, buyer.id, LedgerAccount::Wallet).await, 500);
    }

    #[sqlx::test]
    async fn interrupted_voucher_order_is_retried_until_max(pool: PgPool) {
        let state = app_state(pool.clone(), &StubPaystack::default(), ScriptedProvider::new(vec![]), |_| {}).await;
        let buyer = insert_user(&pool, Role::Admin, None).await;
        let bundle = checker_bundle(&pool).await;
        let max = state.config.dispatch_max_attempts;
        let retried = stuck_order(&pool, &bundle, &buyer, max - 1).await;
        let exhausted = stuck_order(&pool, &bundle, &buyer, max).await;

        let report = reconcile_once(&state).await.unwrap();

        assert_eq!(report.dispatches_resolved, 2);
        let retried = reload(&pool, &retried.reference).await;
        assert_eq!(retried.status, TransactionStatus::Dispatching);
        assert!(retried.retry_at.is_some());
        let exhausted = reload(&pool, &exhausted.reference).await;
        assert_eq!(exhausted.status, TransactionStatus::Refunded);
        assert!(
            exhausted
                .last_error
                .is_some_and(|e| e.starts_with(&format!("gave up after {max} attempts")))
        );
    }

    #[sqlx::test]
    async fn expired_payment_fails_and_a_late_charge_is_refunded(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = app_state(pool.clone(), &stub, ScriptedProvider::new(vec![]), |_| {}).await;
        let order = insert_order(
            &pool,
            &data_bundle(&pool).await,
            None,
            PaymentChannel::Paystack,
            TransactionStatus::AwaitingPayment,
            false,
        )
        .await;
        sqlx::query("UPDATE transactions SET created_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
            .bind(order.id)
            .execute(&pool)
            .await
            .unwrap();
        stub.set_charge(&order.reference, "abandoned", order.amount);

        let report = reconcile_once(&state).await.unwrap();
        assert_eq!(report.payments_expired, 1);
        let expired = reload(&pool, &order.reference).await;
        assert_eq!(expired.status, TransactionStatus::Failed);
        assert!(expired.paid_at.is_none());
        assert!(stub.refunds().is_empty());

        // The customer completes the payment after all
        stub.set_charge(&order.reference, "success", order.amount);
        let confirmed = checkout_service::confirm_payment(&state, &order.reference)
            .await
            .unwrap();

        assert_eq!(confirmed.status, "refunded");
        assert_eq!(stub.refunds(), vec![order.reference.clone()]);
    }

    #[sqlx::test]
    async fn pending_paystack_refund_is_retried(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = app_state(pool.clone(), &stub, ScriptedProvider::new(vec![]), |_| {}).await;
        let order = insert_order(
            &pool,
            &data_bundle(&pool).await,
            None,
            PaymentChannel::Paystack,
            TransactionStatus::Failed,
            true,
        )
        .await;
        stub.set_charge(&order.reference, "success", order.amount);

        let report = reconcile_once(&state).await.unwrap();

        assert_eq!(report.refunds_retried, 1);
        assert_eq!(reload(&pool, &order.reference).await.status, TransactionStatus::Refunded);
        assert_eq!(stub.refunds(), vec![order.reference.clone()]);
    }

    #[test]
    fn empty_report_is_not_logged() {
        assert!(ReconcileReport::default().is_empty());
        let report = ReconcileReport {
            refunds_retried: 1,
            ..Default::default()
        };
        assert!(!report.is_empty());
    }
}
