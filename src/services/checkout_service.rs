//! Order creation and payment confirmation.
//!
//! Two ways to buy:
//! - **Wallet purchase** (registered users, API keys): the wallet is debited
//!   once for the whole batch and every transaction starts out `paid`.
//! - **Storefront checkout** (guests): one transaction at the store price,
//!   paid through Paystack. It becomes `paid` only after `confirm_payment`
//!   has seen a verified, matching charge.
//!
//! `confirm_payment` is shared by the webhook, the verify endpoint and the
//! reconciler, and is safe to run any number of times for a reference.

use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        bundle::{Bundle, BundleKind},
        ledger::{LedgerAccount, LedgerKind},
        transaction::{
            CheckoutRequest, CheckoutResponse, PaymentChannel, PaymentStatusResponse,
            PurchaseRequest, PurchaseResponse, Transaction, TransactionStatus,
        },
    },
    services::{
        bundle_service,
        ledger_service::{self, Posting},
        paystack::{CURRENCY, ChargeStatus, VerifiedPayment, WebhookEvent},
        pricing::{self, CommissionShare},
        settings_service, storefront_service,
        transaction_service::{self, Patch},
        user_service, wallet_service,
    },
    state::AppState,
    validation,
};

const MAX_RECIPIENTS: usize = 100;
const MAX_VOUCHER_QUANTITY: i32 = 50;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 100;

/// What one transaction of a purchase delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub phone_number: Option<String>,
    pub quantity: i32,
}

/// Split a purchase into transactions: one per recipient for data bundles,
/// a single voucher batch for result checkers.
pub fn plan_lines(
    bundle: &Bundle,
    phone_numbers: &[String],
    quantity: Option<i32>,
) -> Result<Vec<Line>, AppError> {
    match bundle.kind {
        BundleKind::DataBundle => {
            let network = bundle.network.ok_or_else(|| {
                AppError::Internal(format!("data bundle {} has no network", bundle.id))
            })?;
            if phone_numbers.is_empty() {
                return Err(AppError::InvalidRequest(
                    "At least one phone number is required".to_string(),
                ));
            }
            if phone_numbers.len() > MAX_RECIPIENTS {
                return Err(AppError::InvalidRequest(format!(
                    "At most {MAX_RECIPIENTS} recipients per order"
                )));
            }
            phone_numbers
                .iter()
                .map(|raw| {
                    Ok(Line {
                        phone_number: Some(validation::phone_for_network(raw, network)?),
                        quantity: 1,
                    })
                })
                .collect()
        }
        BundleKind::ResultChecker => {
            let quantity = quantity.unwrap_or(1);
            if !(1..=MAX_VOUCHER_QUANTITY).contains(&quantity) {
                return Err(AppError::InvalidRequest(format!(
                    "Quantity must be between 1 and {MAX_VOUCHER_QUANTITY}"
                )));
            }
            let phone_number = phone_numbers
                .first()
                .map(|raw| validation::normalize_phone(raw))
                .transpose()?;
            Ok(vec![Line {
                phone_number,
                quantity,
            }])
        }
    }
}

fn scale_shares(shares: &[CommissionShare], quantity: i32) -> Vec<CommissionShare> {
    shares
        .iter()
        .map(|share| CommissionShare {
            beneficiary_id: share.beneficiary_id,
            amount: share.amount * i64::from(quantity),
        })
        .collect()
}

fn line_amount(unit_price: i64, quantity: i32) -> Result<i64, AppError> {
    unit_price
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| AppError::InvalidRequest("Order total is too large".to_string()))
}

struct NewTransaction<'a> {
    batch_reference: &'a str,
    idempotency_key: Option<&'a str>,
    buyer_id: Option<Uuid>,
    storefront_id: Option<Uuid>,
    bundle: &'a Bundle,
    line: Line,
    unit_price: i64,
    customer_email: Option<&'a str>,
    payment_channel: PaymentChannel,
    status: TransactionStatus,
}

async fn insert_transaction(
    conn: &mut sqlx::PgConnection,
    new: NewTransaction<'_>,
) -> Result<Transaction, AppError> {
    let amount = line_amount(new.unit_price, new.line.quantity)?;

    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            reference, batch_reference, idempotency_key, buyer_id, storefront_id, bundle_id,
            network, phone_number, quantity, unit_price, amount, customer_email,
            payment_channel, status, paid_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                CASE WHEN $14 = 'paid' THEN NOW() END)
        RETURNING *
        "#,
    )
    .bind(transaction_service::generate_reference())
    .bind(new.batch_reference)
    .bind(new.idempotency_key)
    .bind(new.buyer_id)
    .bind(new.storefront_id)
    .bind(new.bundle.id)
    .bind(new.bundle.network)
    .bind(new.line.phone_number)
    .bind(new.line.quantity)
    .bind(new.unit_price)
    .bind(amount)
    .bind(new.customer_email)
    .bind(new.payment_channel)
    .bind(new.status)
    .fetch_one(&mut *conn)
    .await?;

    Ok(transaction)
}

fn is_unique_violation(err: &AppError) -> bool {
    matches!(err, AppError::Database(sqlx::Error::Database(db)) if db.is_unique_violation())
}

/// Buy from the wallet, one transaction per recipient.
///
/// Replaying an `idempotency_key` returns the batch it created the first time.
pub async fn wallet_purchase(
    state: &AppState,
    auth: &AuthContext,
    request: PurchaseRequest,
) -> Result<PurchaseResponse, AppError> {
    let pool = &state.pool;
    settings_service::ensure_open(pool, Some(auth)).await?;

    let idempotency_key = request
        .idempotency_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty());
    if let Some(key) = idempotency_key {
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::InvalidRequest(format!(
                "idempotency_key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }
        if let Some(existing) = replay(state, auth.user_id, key).await? {
            return Ok(existing);
        }
    }

    let bundle = bundle_service::get_active(pool, request.bundle_id).await?;
    let lines = plan_lines(&bundle, &request.phone_numbers, request.quantity)?;
    let unit_price = pricing::price_for(&bundle.prices, auth.role);

    let mut total: i64 = 0;
    for line in &lines {
        total = total
            .checked_add(line_amount(unit_price, line.quantity)?)
            .ok_or_else(|| AppError::InvalidRequest("Order total is too large".to_string()))?;
    }

    let chain = user_service::ancestors(pool, auth.user_id).await?;
    let shares = pricing::commission_cascade(&bundle.prices, unit_price, &chain);

    let batch_reference = transaction_service::generate_reference();
    let mut tx = pool.begin().await?;

    let entry = ledger_service::post(
        &mut tx,
        Posting {
            user_id: auth.user_id,
            account: LedgerAccount::Wallet,
            kind: LedgerKind::Purchase,
            amount: -total,
            reference: &batch_reference,
            description: Some(format!("{} x{}", bundle.name, lines.len())),
        },
    )
    .await?
    .ok_or_else(|| AppError::Internal(format!("batch {batch_reference} already debited")))?;

    let mut transactions = Vec::with_capacity(lines.len());
    for (index, line) in lines.into_iter().enumerate() {
        let quantity = line.quantity;
        let inserted = insert_transaction(
            &mut tx,
            NewTransaction {
                batch_reference: &batch_reference,
                // Unique per buyer, so only the first row of the batch carries it
                idempotency_key: if index == 0 { idempotency_key } else { None },
                buyer_id: Some(auth.user_id),
                storefront_id: None,
                bundle: &bundle,
                line,
                unit_price,
                customer_email: None,
                payment_channel: PaymentChannel::Wallet,
                status: TransactionStatus::Paid,
            },
        )
        .await;

        let transaction = match inserted {
            Ok(transaction) => transaction,
            Err(err) if index == 0 && idempotency_key.is_some() && is_unique_violation(&err) => {
                // A concurrent request with the same key won the race
                drop(tx);
                let key = idempotency_key.unwrap_or_default();
                return replay(state, auth.user_id, key)
                    .await?
                    .ok_or_else(|| AppError::Conflict("Duplicate idempotency key".to_string()));
            }
            Err(err) => return Err(err),
        };

        transaction_service::plan_commissions(
            &mut tx,
            transaction.id,
            &scale_shares(&shares, quantity),
        )
        .await?;
        transactions.push(transaction);
    }

    tx.commit().await?;
    state.wake_dispatcher();

    tracing::info!(
        batch_reference = %batch_reference,
        buyer_id = %auth.user_id,
        bundle_id = %bundle.id,
        count = transactions.len(),
        total,
        "wallet purchase created"
    );

    Ok(PurchaseResponse {
        batch_reference,
        total_amount: total,
        wallet_balance: entry.balance_after,
        transactions: transactions.into_iter().map(Into::into).collect(),
    })
}

async fn replay(
    state: &AppState,
    buyer_id: Uuid,
    key: &str,
) -> Result<Option<PurchaseResponse>, AppError> {
    let batch_reference: Option<String> = sqlx::query_scalar(
        "SELECT batch_reference FROM transactions WHERE buyer_id = $1 AND idempotency_key = $2",
    )
    .bind(buyer_id)
    .bind(key)
    .fetch_optional(&state.pool)
    .await?;

    let Some(batch_reference) = batch_reference else {
        return Ok(None);
    };

    let transactions = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE batch_reference = $1 ORDER BY created_at, reference",
    )
    .bind(&batch_reference)
    .fetch_all(&state.pool)
    .await?;

    let wallet_balance: i64 = sqlx::query_scalar("SELECT wallet_balance FROM users WHERE id = $1")
        .bind(buyer_id)
        .fetch_one(&state.pool)
        .await?;

    tracing::debug!(batch_reference = %batch_reference, "idempotent purchase replayed");

    Ok(Some(PurchaseResponse {
        batch_reference,
        total_amount: transactions.iter().map(|t| t.amount).sum(),
        wallet_balance,
        transactions: transactions.into_iter().map(Into::into).collect(),
    }))
}

/// Guest checkout on a storefront through Paystack.
pub async fn storefront_checkout(
    state: &AppState,
    slug: &str,
    request: CheckoutRequest,
) -> Result<CheckoutResponse, AppError> {
    let pool = &state.pool;
    settings_service::ensure_open(pool, None).await?;

    let (storefront, owner_role) = storefront_service::open_storefront(pool, slug).await?;
    let bundle = bundle_service::get_active(pool, request.bundle_id).await?;
    let email = validation::normalize_email(&request.email)?;

    let phone_numbers: Vec<String> = request.phone_number.into_iter().collect();
    let line = plan_lines(&bundle, &phone_numbers, request.quantity)?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::InvalidRequest("Nothing to buy".to_string()))?;

    let custom = storefront_service::custom_price(pool, storefront.id, bundle.id).await?;
    let unit_price = storefront_service::store_price(&bundle.prices, owner_role, custom);

    let mut chain = vec![pricing::ChainMember {
        user_id: storefront.owner_id,
        role: owner_role,
    }];
    chain.extend(user_service::ancestors(pool, storefront.owner_id).await?);
    let shares = scale_shares(
        &pricing::commission_cascade(&bundle.prices, unit_price, &chain),
        line.quantity,
    );

    let batch_reference = transaction_service::generate_reference();
    let phone_number = line.phone_number.clone();

    let mut tx = pool.begin().await?;
    let transaction = insert_transaction(
        &mut tx,
        NewTransaction {
            batch_reference: &batch_reference,
            idempotency_key: None,
            buyer_id: None,
            storefront_id: Some(storefront.id),
            bundle: &bundle,
            line,
            unit_price,
            customer_email: Some(&email),
            payment_channel: PaymentChannel::Paystack,
            status: TransactionStatus::Initiated,
        },
    )
    .await?;
    transaction_service::plan_commissions(&mut tx, transaction.id, &shares).await?;
    tx.commit().await?;

    let metadata = json!({
        "storefront": storefront.slug,
        "bundle": bundle.name,
        "phone_number": phone_number,
        "quantity": transaction.quantity,
    });

    let payment = match state
        .paystack
        .initialize(&email, transaction.amount, &transaction.reference, metadata)
        .await
    {
        Ok(payment) => payment,
        Err(err) => {
            tracing::error!(reference = %transaction.reference, error = %err, "paystack initialization failed");
            transaction_service::fail_and_refund(
                pool,
                &state.paystack,
                &transaction.reference,
                "payment initialization failed",
            )
            .await?;
            return Err(err.into());
        }
    };

    let mut tx = pool.begin().await?;
    transaction_service::advance(
        &mut tx,
        &transaction.reference,
        TransactionStatus::AwaitingPayment,
        Patch::default(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        reference = %transaction.reference,
        storefront = %storefront.slug,
        amount = transaction.amount,
        "storefront checkout started"
    );

    Ok(CheckoutResponse {
        reference: transaction.reference,
        amount: transaction.amount,
        authorization_url: payment.authorization_url,
    })
}

/// What a verified Paystack charge means for a payment of `expected_amount`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeCheck {
    Paid,
    Failed(String),
    /// Not settled yet; ask again later.
    Pending,
}

pub fn check_charge(payment: &VerifiedPayment, expected_amount: i64) -> ChargeCheck {
    match payment.status {
        ChargeStatus::Success if payment.currency != CURRENCY => ChargeCheck::Failed(format!(
            "charged in {} instead of {CURRENCY}",
            payment.currency
        )),
        ChargeStatus::Success if payment.amount != expected_amount => ChargeCheck::Failed(format!(
            "charged {} pesewas, expected {expected_amount}",
            payment.amount
        )),
        ChargeStatus::Success => ChargeCheck::Paid,
        ref status if status.is_final_failure() => {
            ChargeCheck::Failed("payment was not completed".to_string())
        }
        _ => ChargeCheck::Pending,
    }
}

/// Apply Paystack's verdict for `reference`, an order or a wallet top-up.
pub async fn confirm_payment(
    state: &AppState,
    reference: &str,
) -> Result<PaymentStatusResponse, AppError> {
    if let Some(transaction) = transaction_service::get_by_reference(&state.pool, reference).await? {
        return confirm_order(state, transaction).await;
    }
    if let Some(topup) = wallet_service::get_topup(&state.pool, reference).await? {
        return wallet_service::confirm_topup(state, topup).await;
    }
    Err(AppError::NotFound("Payment"))
}

async fn confirm_order(
    state: &AppState,
    transaction: Transaction,
) -> Result<PaymentStatusResponse, AppError> {
    if transaction.payment_channel != PaymentChannel::Paystack {
        return Ok(order_status(&transaction));
    }
    let awaiting = matches!(
        transaction.status,
        TransactionStatus::Initiated | TransactionStatus::AwaitingPayment
    );
    // Expired (or failed to start) before Paystack reported a charge
    let failed_unpaid =
        transaction.status == TransactionStatus::Failed && transaction.paid_at.is_none();
    if !awaiting && !failed_unpaid {
        return Ok(order_status(&transaction));
    }

    let payment = state.paystack.verify(&transaction.reference).await?;

    let updated = match check_charge(&payment, transaction.amount) {
        ChargeCheck::Paid if awaiting => {
            let mut tx = state.pool.begin().await?;
            let advanced = transaction_service::advance(
                &mut tx,
                &transaction.reference,
                TransactionStatus::Paid,
                Patch::default(),
            )
            .await?;
            tx.commit().await?;

            if advanced.changed {
                tracing::info!(reference = %transaction.reference, "storefront payment confirmed");
                state.wake_dispatcher();
            }
            advanced.transaction
        }
        ChargeCheck::Paid => {
            refund_stray_charge(
                state,
                &transaction.reference,
                "payment arrived after the order had failed",
            )
            .await?
        }
        ChargeCheck::Failed(reason) if payment.status == ChargeStatus::Success => {
            refund_stray_charge(state, &transaction.reference, &reason).await?
        }
        ChargeCheck::Failed(reason) => {
            transaction_service::fail_and_refund(
                &state.pool,
                &state.paystack,
                &transaction.reference,
                &reason,
            )
            .await?
        }
        ChargeCheck::Pending => transaction,
    };

    Ok(order_status(&updated))
}

/// Paystack took money that cannot pay for the order: fail the order and
/// send the charge back. A refund that does not go through stays `failed`
/// with `paid_at` set, which the reconciler retries.
async fn refund_stray_charge(
    state: &AppState,
    reference: &str,
    reason: &str,
) -> Result<Transaction, AppError> {
    tracing::error!(reference, reason, "charge cannot be applied to its order, refunding");

    transaction_service::fail_and_refund(&state.pool, &state.paystack, reference, reason).await?;
    transaction_service::record_late_charge(&state.pool, reference, reason).await?;

    match transaction_service::refund(&state.pool, &state.paystack, reference).await {
        Ok(transaction) => Ok(transaction),
        Err(err) => {
            tracing::error!(reference, error = %err, "refund of stray charge failed");
            transaction_service::get_by_reference(&state.pool, reference)
                .await?
                .ok_or(AppError::NotFound("Transaction"))
        }
    }
}

fn order_status(transaction: &Transaction) -> PaymentStatusResponse {
    PaymentStatusResponse {
        reference: transaction.reference.clone(),
        kind: "order",
        status: transaction.status.to_string(),
    }
}

/// Verify and apply a Paystack webhook delivery.
///
/// Every authentic event is logged to `paystack_events`; only
/// `charge.success` changes state.
pub async fn handle_webhook(
    state: &AppState,
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), AppError> {
    let authentic = signature.is_some_and(|sig| state.paystack.verify_signature(body, sig));
    if !authentic {
        tracing::warn!("paystack webhook with invalid signature");
        return Err(AppError::Unauthorized);
    }

    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid webhook body: {e}")))?;
    let event: WebhookEvent = serde_json::from_value(payload.clone())
        .map_err(|e| AppError::InvalidRequest(format!("Invalid webhook body: {e}")))?;

    sqlx::query("INSERT INTO paystack_events (event, reference, payload) VALUES ($1, $2, $3)")
        .bind(&event.event)
        .bind(&event.data.reference)
        .bind(&payload)
        .execute(&state.pool)
        .await?;

    tracing::info!(event = %event.event, reference = ?event.data.reference, "paystack webhook received");

    if event.event != "charge.success" {
        return Ok(());
    }
    let Some(reference) = event.data.reference.as_deref() else {
        return Ok(());
    };

    match confirm_payment(state, reference).await {
        Ok(status) => {
            tracing::debug!(reference, status = %status.status, "webhook applied");
            Ok(())
        }
        // Charges created outside this service
        Err(AppError::NotFound(_)) => {
            tracing::warn!(reference, "webhook for unknown reference");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            bundle::{Network, PriceTiers},
            user::Role,
        },
        services::{paystack::sign, reconciler},
        test_support::{
            ScriptedProvider, StubPaystack, app_state, auth, balance, credit, data_bundle,
            insert_chain, insert_order, insert_storefront, reload,
        },
    };
    use chrono::Utc;
    use sqlx::PgPool;

    async fn test_state(pool: &PgPool, stub: &StubPaystack) -> AppState {
        app_state(pool.clone(), stub, ScriptedProvider::new(vec![]), |_| {}).await
    }

    async fn paystack_order(pool: &PgPool, status: TransactionStatus) -> Transaction {
        let bundle = data_bundle(pool).await;
        insert_order(pool, &bundle, None, PaymentChannel::Paystack, status, false).await
    }

    fn purchase(bundle_id: Uuid, key: Option<&str>) -> PurchaseRequest {
        PurchaseRequest {
            bundle_id,
            phone_numbers: vec!["0241234567".to_string(), "0551234567".to_string()],
            quantity: None,
            idempotency_key: key.map(str::to_string),
        }
    }

    #[sqlx::test]
    async fn wallet_purchase_replays_idempotency_key(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = test_state(&pool, &stub).await;
        let chain = insert_chain(&pool, &[Role::Admin, Role::User]).await;
        let buyer = auth(&chain[1]);
        credit(&pool, buyer.user_id, LedgerAccount::Wallet, 2_000).await;
        let bundle = data_bundle(&pool).await;

        let first = wallet_purchase(&state, &buyer, purchase(bundle.id, Some("order-1")))
            .await
            .unwrap();
        let replayed = wallet_purchase(&state, &buyer, purchase(bundle.id, Some("order-1")))
            .await
            .unwrap();

        assert_eq!(first.total_amount, 1_000);
        assert_eq!(first.wallet_balance, 1_000);
        assert_eq!(first.transactions.len(), 2);
        assert_eq!(replayed.batch_reference, first.batch_reference);
        assert_eq!(replayed.total_amount, 1_000);
        assert_eq!(replayed.wallet_balance, 1_000);
        assert_eq!(balance(&pool, buyer.user_id, LedgerAccount::Wallet).await, 1_000);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[sqlx::test]
    async fn wallet_purchase_needs_funds(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = test_state(&pool, &stub).await;
        let chain = insert_chain(&pool, &[Role::Admin, Role::User]).await;
        let buyer = auth(&chain[1]);
        credit(&pool, buyer.user_id, LedgerAccount::Wallet, 999).await;
        let bundle = data_bundle(&pool).await;

        let result = wallet_purchase(&state, &buyer, purchase(bundle.id, None)).await;

        assert!(matches!(result, Err(AppError::InsufficientBalance)));
        assert_eq!(balance(&pool, buyer.user_id, LedgerAccount::Wallet).await, 999);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test]
    async fn storefront_checkout_then_matching_charge_is_paid(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = test_state(&pool, &stub).await;
        let chain = insert_chain(&pool, &[Role::Admin, Role::Agent]).await;
        insert_storefront(&pool, chain[1].id, "ama-data").await;
        let bundle = data_bundle(&pool).await;

        let checkout = storefront_checkout(
            &state,
            "ama-data",
            CheckoutRequest {
                bundle_id: bundle.id,
                phone_number: Some("0241234567".to_string()),
                quantity: None,
                email: "guest@example.com".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(checkout.amount, 500);
        assert!(checkout.authorization_url.ends_with(&checkout.reference));
        assert_eq!(
            reload(&pool, &checkout.reference).await.status,
            TransactionStatus::AwaitingPayment
        );

        stub.set_charge(&checkout.reference, "success", 500);
        let confirmed = confirm_payment(&state, &checkout.reference).await.unwrap();

        assert_eq!(confirmed.status, "paid");
        assert!(reload(&pool, &checkout.reference).await.paid_at.is_some());
        assert!(stub.refunds().is_empty());
    }

    #[sqlx::test]
    async fn charge_after_expiry_is_refunded(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = test_state(&pool, &stub).await;
        let order = paystack_order(&pool, TransactionStatus::Failed).await;
        stub.set_charge(&order.reference, "success", order.amount);

        let confirmed = confirm_payment(&state, &order.reference).await.unwrap();

        assert_eq!(confirmed.status, "refunded");
        assert!(reload(&pool, &order.reference).await.paid_at.is_some());
        assert_eq!(stub.refunds(), vec![order.reference.clone()]);

        // Webhook retries and later passes leave it alone
        confirm_payment(&state, &order.reference).await.unwrap();
        reconciler::reconcile_once(&state).await.unwrap();
        assert_eq!(stub.refunds().len(), 1);
    }

    #[sqlx::test]
    async fn mismatched_charge_is_refunded(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = test_state(&pool, &stub).await;
        let order = paystack_order(&pool, TransactionStatus::AwaitingPayment).await;
        stub.set_charge(&order.reference, "success", order.amount - 100);

        let confirmed = confirm_payment(&state, &order.reference).await.unwrap();

        assert_eq!(confirmed.status, "refunded");
        assert_eq!(stub.refunds(), vec![order.reference.clone()]);
    }

    #[sqlx::test]
    async fn unsettled_charge_leaves_order_waiting(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = test_state(&pool, &stub).await;
        let order = paystack_order(&pool, TransactionStatus::AwaitingPayment).await;
        stub.set_charge(&order.reference, "abandoned", order.amount);

        let confirmed = confirm_payment(&state, &order.reference).await.unwrap();

        assert_eq!(confirmed.status, "awaiting_payment");
        assert!(stub.refunds().is_empty());
    }

    #[sqlx::test]
    async fn signed_webhook_confirms_payment(pool: PgPool) {
        let stub = StubPaystack::default();
        let state = test_state(&pool, &stub).await;
        let order = paystack_order(&pool, TransactionStatus::AwaitingPayment).await;
        stub.set_charge(&order.reference, "success", order.amount);

        let body = json!({"event": "charge.success", "data": {"reference": order.reference}})
            .to_string();
        let signature = sign(&state.config.paystack_secret_key, body.as_bytes());

        handle_webhook(&state, Some(signature.as_str()), body.as_bytes())
            .await
            .unwrap();

        assert_eq!(reload(&pool, &order.reference).await.status, TransactionStatus::Paid);
        let logged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM paystack_events WHERE reference = $1")
            .bind(&order.reference)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(logged, 1);

        let forged = handle_webhook(&state, Some("00"), body.as_bytes()).await;
        assert!(matches!(forged, Err(AppError::Unauthorized)));
    }

    fn bundle(kind: BundleKind) -> Bundle {
        Bundle {
            id: Uuid::new_v4(),
            kind,
            network: (kind == BundleKind::DataBundle).then_some(Network::Mtn),
            exam_board: (kind == BundleKind::ResultChecker).then(|| "WAEC".to_string()),
            name: "Test".to_string(),
            capacity_mb: Some(1024),
            validity_days: None,
            prices: PriceTiers {
                base_price: 400,
                master_price: 420,
                super_dealer_price: 440,
                dealer_price: 460,
                agent_price: 480,
                user_price: 500,
            },
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payment(status: ChargeStatus, amount: i64, currency: &str) -> VerifiedPayment {
        VerifiedPayment {
            status,
            reference: "DB1".to_string(),
            amount,
            currency: currency.to_string(),
        }
    }

    #[test]
    fn data_bundle_lines_per_recipient() {
        let numbers = vec!["+233241234567".to_string(), "0551234567".to_string()];
        let lines = plan_lines(&bundle(BundleKind::DataBundle), &numbers, None).unwrap();
        assert_eq!(
            lines,
            vec![
                Line {
                    phone_number: Some("0241234567".to_string()),
                    quantity: 1
                },
                Line {
                    phone_number: Some("0551234567".to_string()),
                    quantity: 1
                },
            ]
        );
    }

    #[test]
    fn data_bundle_rejects_other_networks_and_empty_lists() {
        let data = bundle(BundleKind::DataBundle);
        let telecel = vec!["0201234567".to_string()];
        assert!(matches!(
            plan_lines(&data, &telecel, None),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            plan_lines(&data, &[], None),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn vouchers_are_one_line_with_quantity() {
        let checker = bundle(BundleKind::ResultChecker);
        let lines = plan_lines(&checker, &[], Some(3)).unwrap();
        assert_eq!(
            lines,
            vec![Line {
                phone_number: None,
                quantity: 3
            }]
        );
        assert!(plan_lines(&checker, &[], Some(0)).is_err());
        assert!(plan_lines(&checker, &[], Some(MAX_VOUCHER_QUANTITY + 1)).is_err());
    }

    #[test]
    fn commission_scales_with_quantity() {
        let id = Uuid::new_v4();
        let shares = [CommissionShare {
            beneficiary_id: id,
            amount: 20,
        }];
        assert_eq!(scale_shares(&shares, 3)[0].amount, 60);
    }

    #[test]
    fn matching_success_is_paid() {
        assert_eq!(
            check_charge(&payment(ChargeStatus::Success, 500, "GHS"), 500),
            ChargeCheck::Paid
        );
    }

    #[test]
    fn mismatched_success_fails() {
        assert!(matches!(
            check_charge(&payment(ChargeStatus::Success, 400, "GHS"), 500),
            ChargeCheck::Failed(_)
        ));
        assert!(matches!(
            check_charge(&payment(ChargeStatus::Success, 500, "NGN"), 500),
            ChargeCheck::Failed(_)
        ));
    }

    #[test]
    fn unsettled_charges_stay_pending() {
        for status in [ChargeStatus::Pending, ChargeStatus::Abandoned, ChargeStatus::Ongoing] {
            assert_eq!(check_charge(&payment(status, 500, "GHS"), 500), ChargeCheck::Pending);
        }
        assert!(matches!(
            check_charge(&payment(ChargeStatus::Failed, 500, "GHS"), 500),
            ChargeCheck::Failed(_)
        ));
    }
}
