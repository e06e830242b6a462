//! Fulfillment worker.
//!
//! Claims paid orders (and dispatching orders whose retry is due) with
//! `FOR UPDATE SKIP LOCKED`, so several instances can run side by side, and
//! fulfils each claimed order concurrently:
//!
//! - data bundles are submitted to the network's provider, keyed by the
//!   transaction reference;
//! - result checkers get vouchers assigned from local stock.
//!
//! Delivery is at-most-once: an order is only resubmitted when the provider
//! certainly did not take it. Ambiguous outcomes are left for the reconciler,
//! which asks the provider before doing anything.

use std::time::Duration;

use chrono::Utc;
use tokio::{sync::watch, task::JoinSet};

use crate::{
    config::RetryPolicy,
    error::AppError,
    models::{bundle::BundleKind, transaction::Transaction},
    services::{
        providers::{DispatchOrder, DispatchOutcome},
        transaction_service,
    },
    state::AppState,
};

/// Run until `shutdown` flips to `true`.
pub async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let poll = Duration::from_secs(state.config.dispatch_poll_secs);
    tracing::info!(poll_secs = poll.as_secs(), "dispatcher started");

    while !*shutdown.borrow() {
        match dispatch_due(&state).await {
            // A full batch suggests more work is waiting
            Ok(claimed) if claimed as i64 >= state.config.dispatch_batch_size => continue,
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "dispatch cycle failed"),
        }

        tokio::select! {
            _ = state.dispatch_signal.notified() => {}
            _ = tokio::time::sleep(poll) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!("dispatcher stopped");
}

/// Claim one batch and process it. Returns the number of claimed orders.
pub async fn dispatch_due(state: &AppState) -> Result<usize, AppError> {
    let claimed = claim(state).await?;
    let count = claimed.len();

    let mut workers = JoinSet::new();
    for transaction in claimed {
        let state = state.clone();
        workers.spawn(async move {
            let reference = transaction.reference.clone();
            if let Err(e) = process(&state, transaction).await {
                // The order stays dispatching without a retry; the reconciler picks it up
                tracing::error!(reference = %reference, error = %e, "dispatch failed");
            }
        });
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "dispatch task panicked");
        }
    }

    Ok(count)
}

async fn claim(state: &AppState) -> Result<Vec<Transaction>, AppError> {
    let transactions = sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = 'dispatching', attempts = attempts + 1, retry_at = NULL, updated_at = NOW()
        WHERE id IN (
            SELECT id FROM transactions
            WHERE status = 'paid'
               OR (status = 'dispatching' AND retry_at IS NOT NULL AND retry_at <= NOW())
            ORDER BY COALESCE(retry_at, paid_at, created_at)
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(state.config.dispatch_batch_size)
    .fetch_all(&state.pool)
    .await?;

    if !transactions.is_empty() {
        tracing::debug!(count = transactions.len(), "claimed orders for dispatch");
    }
    Ok(transactions)
}

async fn process(state: &AppState, transaction: Transaction) -> Result<(), AppError> {
    let kind: BundleKind = sqlx::query_scalar("SELECT kind FROM bundles WHERE id = $1")
        .bind(transaction.bundle_id)
        .fetch_one(&state.pool)
        .await?;

    let outcome = match kind {
        BundleKind::ResultChecker => assign_vouchers(state, &transaction).await?,
        BundleKind::DataBundle => submit(state, &transaction).await,
    };

    record_attempt(state, &transaction, &outcome).await?;
    apply_outcome(state, &transaction, outcome).await
}

async fn submit(state: &AppState, transaction: &Transaction) -> DispatchOutcome {
    let (Some(network), Some(recipient)) = (transaction.network, transaction.phone_number.clone())
    else {
        return DispatchOutcome::Rejected {
            http_status: None,
            reason: "order has no network or recipient".to_string(),
        };
    };

    let capacity_mb: Option<i32> =
        match sqlx::query_scalar("SELECT capacity_mb FROM bundles WHERE id = $1")
            .bind(transaction.bundle_id)
            .fetch_one(&state.pool)
            .await
        {
            Ok(capacity) => capacity,
            Err(e) => {
                return DispatchOutcome::Transient {
                    http_status: None,
                    reason: format!("bundle lookup failed: {e}"),
                };
            }
        };
    let Some(capacity_mb) = capacity_mb else {
        return DispatchOutcome::Rejected {
            http_status: None,
            reason: "bundle has no capacity".to_string(),
        };
    };

    let provider = match state.providers.get(network) {
        Ok(provider) => provider,
        Err(e) => {
            return DispatchOutcome::Transient {
                http_status: None,
                reason: e.to_string(),
            };
        }
    };

    let order = DispatchOrder {
        reference: transaction.reference.clone(),
        network,
        recipient,
        capacity_mb,
    };

    let outcome = provider.submit(&order).await;
    tracing::info!(
        reference = %transaction.reference,
        provider = provider.name(),
        attempt = transaction.attempts,
        outcome = outcome.label(),
        "order submitted"
    );
    outcome
}

/// Hand out vouchers and deliver in one database transaction.
async fn assign_vouchers(
    state: &AppState,
    transaction: &Transaction,
) -> Result<DispatchOutcome, AppError> {
    let mut tx = state.pool.begin().await?;

    let already: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vouchers WHERE transaction_id = $1")
        .bind(transaction.id)
        .fetch_one(&mut *tx)
        .await?;
    let missing = i64::from(transaction.quantity) - already;

    if missing > 0 {
        let assigned = sqlx::query(
            r#"
            UPDATE vouchers SET transaction_id = $1, sold_at = NOW()
            WHERE id IN (
                SELECT id FROM vouchers
                WHERE bundle_id = $2 AND transaction_id IS NULL
                ORDER BY created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.bundle_id)
        .bind(missing)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if (assigned as i64) < missing {
            tx.rollback().await?;
            return Ok(DispatchOutcome::Rejected {
                http_status: None,
                reason: format!(
                    "only {} of {} vouchers in stock",
                    already + assigned as i64,
                    transaction.quantity
                ),
            });
        }
    }

    transaction_service::deliver(&mut tx, &transaction.reference, None).await?;
    tx.commit().await?;

    tracing::info!(
        reference = %transaction.reference,
        quantity = transaction.quantity,
        "vouchers assigned"
    );
    Ok(DispatchOutcome::Delivered {
        provider_reference: None,
    })
}

async fn record_attempt(
    state: &AppState,
    transaction: &Transaction,
    outcome: &DispatchOutcome,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO dispatch_attempts (transaction_id, attempt, outcome, http_status, detail)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.attempts)
    .bind(outcome.label())
    .bind(outcome.http_status().map(i32::from))
    .bind(outcome.detail())
    .execute(&state.pool)
    .await?;
    Ok(())
}

async fn apply_outcome(
    state: &AppState,
    transaction: &Transaction,
    outcome: DispatchOutcome,
) -> Result<(), AppError> {
    let reference = transaction.reference.as_str();

    match outcome {
        DispatchOutcome::Delivered { provider_reference } => {
            transaction_service::complete_delivery(&state.pool, reference, provider_reference)
                .await?;
        }
        DispatchOutcome::Accepted { provider_reference } => {
            // retry_at stays NULL: the reconciler polls the provider
            sqlx::query(
                r#"
                UPDATE transactions
                SET provider_reference = COALESCE($2, provider_reference), updated_at = NOW()
                WHERE id = $1 AND status = 'dispatching'
                "#,
            )
            .bind(transaction.id)
            .bind(provider_reference)
            .execute(&state.pool)
            .await?;
        }
        DispatchOutcome::Rejected { reason, .. } => {
            transaction_service::fail_and_refund(&state.pool, &state.paystack, reference, &reason)
                .await?;
        }
        DispatchOutcome::Transient { reason, .. } => {
            retry_or_fail(state, transaction, &reason).await?;
        }
        DispatchOutcome::Ambiguous { reason, .. } => {
            tracing::warn!(reference, reason = %reason, "dispatch outcome unknown, awaiting reconciliation");
            sqlx::query(
                "UPDATE transactions SET last_error = $2, updated_at = NOW() WHERE id = $1 AND status = 'dispatching'",
            )
            .bind(transaction.id)
            .bind(&reason)
            .execute(&state.pool)
            .await?;
        }
    }

    Ok(())
}

/// Retry a dispatching order with backoff, or fail and refund it once the
/// attempt budget is spent.
pub async fn retry_or_fail(
    state: &AppState,
    transaction: &Transaction,
    reason: &str,
) -> Result<(), AppError> {
    let policy = state.config.dispatch_policy();
    if policy.can_retry(transaction.attempts) {
        let delay = backoff_with_jitter(&policy, transaction.attempts);
        return schedule_retry(state, transaction, delay, reason).await;
    }

    let reason = format!("gave up after {} attempts: {reason}", transaction.attempts);
    transaction_service::fail_and_refund(
        &state.pool,
        &state.paystack,
        &transaction.reference,
        &reason,
    )
    .await?;
    Ok(())
}

/// Schedule another attempt of a dispatching order after `delay`.
async fn schedule_retry(
    state: &AppState,
    transaction: &Transaction,
    delay: Duration,
    reason: &str,
) -> Result<(), AppError> {
    let retry_at = Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));

    sqlx::query(
        r#"
        UPDATE transactions SET retry_at = $2, last_error = $3, updated_at = NOW()
        WHERE id = $1 AND status = 'dispatching'
        "#,
    )
    .bind(transaction.id)
    .bind(retry_at)
    .bind(reason)
    .execute(&state.pool)
    .await?;

    tracing::info!(
        reference = %transaction.reference,
        attempt = transaction.attempts,
        retry_in_secs = delay.as_secs(),
        reason,
        "dispatch retry scheduled"
    );
    Ok(())
}

/// Policy delay plus up to 20% random jitter.
pub fn backoff_with_jitter(policy: &RetryPolicy, attempt: i32) -> Duration {
    let delay = policy.delay_for(attempt);
    let max_jitter = (delay.as_millis() / 5) as u64;
    let jitter = if max_jitter == 0 {
        0
    } else {
        rand::random_range(0..=max_jitter)
    };
    delay + Duration::from_millis(jitter)
}
