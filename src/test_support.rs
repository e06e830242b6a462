//! Fixtures shared by the database tests.
//!
//! Tests run under `#[sqlx::test]`, which hands each test a fresh database
//! with the migrations applied. Paystack is replaced by a local axum stub and
//! the bundle provider by a scripted in-memory one.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    config::{Config, test_config},
    db::DbPool,
    middleware::auth::AuthContext,
    models::{
        bundle::{Bundle, BundleKind, Network},
        ledger::{LedgerAccount, LedgerKind},
        transaction::{PaymentChannel, Transaction, TransactionStatus},
        user::{Role, User},
    },
    services::{
        ledger_service::{self, Posting},
        paystack::PaystackClient,
        providers::{
            BundleProvider, DispatchOrder, DispatchOutcome, ProviderError, ProviderRegistry,
            ProviderStatus,
        },
        transaction_service,
    },
    state::AppState,
};

/// In-memory Paystack: charges are set by the test, refunds are recorded.
#[derive(Debug, Clone, Default)]
pub struct StubPaystack {
    charges: Arc<Mutex<HashMap<String, (String, i64)>>>,
    refunds: Arc<Mutex<Vec<String>>>,
}

impl StubPaystack {
    /// What `transaction/verify/{reference}` reports.
    pub fn set_charge(&self, reference: &str, status: &str, amount: i64) {
        self.charges
            .lock()
            .unwrap()
            .insert(reference.to_string(), (status.to_string(), amount));
    }

    pub fn refunds(&self) -> Vec<String> {
        self.refunds.lock().unwrap().clone()
    }

    pub async fn serve(&self) -> String {
        let router = Router::new()
            .route("/transaction/initialize", post(initialize))
            .route("/transaction/verify/{reference}", get(verify))
            .route("/refund", post(refund))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}

async fn initialize(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "status": true,
        "message": "Authorization URL created",
        "data": {
            "authorization_url": format!("https://checkout.paystack.com/{}", body["reference"].as_str().unwrap_or_default()),
            "reference": body["reference"],
        }
    }))
}

async fn verify(
    State(stub): State<StubPaystack>,
    Path(reference): Path<String>,
) -> (StatusCode, Json<Value>) {
    let charge = stub.charges.lock().unwrap().get(&reference).cloned();
    match charge {
        Some((status, amount)) => (
            StatusCode::OK,
            Json(json!({
                "status": true,
                "message": "Verification successful",
                "data": {
                    "status": status,
                    "reference": reference,
                    "amount": amount,
                    "currency": "GHS",
                }
            })),
        ),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": false, "message": "Transaction reference not found"})),
        ),
    }
}

async fn refund(State(stub): State<StubPaystack>, Json(body): Json<Value>) -> Json<Value> {
    let reference = body["transaction"].as_str().unwrap_or_default().to_string();
    if let Some(charge) = stub.charges.lock().unwrap().get_mut(&reference) {
        charge.0 = "reversed".to_string();
    }
    stub.refunds.lock().unwrap().push(reference);
    Json(json!({"status": true, "message": "Refund has been queued for processing", "data": {}}))
}

/// Provider that replays queued outcomes, then delivers.
#[derive(Debug)]
pub struct ScriptedProvider {
    outcomes: Mutex<VecDeque<DispatchOutcome>>,
    status: Mutex<ProviderStatus>,
    submitted: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(outcomes: Vec<DispatchOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            status: Mutex::new(ProviderStatus::Processing),
            submitted: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, status: ProviderStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BundleProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, order: &DispatchOrder) -> DispatchOutcome {
        self.submitted.lock().unwrap().push(order.reference.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DispatchOutcome::Delivered {
                provider_reference: None,
            })
    }

    async fn status(&self, _reference: &str) -> Result<ProviderStatus, ProviderError> {
        Ok(self.status.lock().unwrap().clone())
    }
}

pub fn transient(reason: &str) -> DispatchOutcome {
    DispatchOutcome::Transient {
        http_status: Some(503),
        reason: reason.to_string(),
    }
}

/// App state over the test database, the Paystack stub and `provider`.
pub async fn app_state(
    pool: DbPool,
    paystack: &StubPaystack,
    provider: Arc<ScriptedProvider>,
    tweak: impl FnOnce(&mut Config),
) -> AppState {
    let mut config = test_config();
    config.paystack_base_url = paystack.serve().await;
    tweak(&mut config);

    let client = PaystackClient::new(&config.paystack_base_url, &config.paystack_secret_key, None)
        .unwrap();
    AppState::new(pool, config, client, ProviderRegistry::single(provider))
}

pub async fn insert_user(pool: &DbPool, role: Role, parent_id: Option<Uuid>) -> User {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, full_name, password_hash, role, parent_id)
        VALUES ($1, 'Test User', 'not-a-hash', $2, $3)
        RETURNING *
        "#,
    )
    .bind(format!("{}@example.com", Uuid::new_v4()))
    .bind(role)
    .bind(parent_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Admin → master → ... → `role`, returning the whole chain top-down.
pub async fn insert_chain(pool: &DbPool, roles: &[Role]) -> Vec<User> {
    let mut chain: Vec<User> = Vec::new();
    for role in roles {
        let parent = chain.last().map(|u| u.id);
        chain.push(insert_user(pool, *role, parent).await);
    }
    chain
}

pub async fn credit(pool: &DbPool, user_id: Uuid, account: LedgerAccount, amount: i64) {
    let mut tx = pool.begin().await.unwrap();
    ledger_service::post(
        &mut tx,
        Posting {
            user_id,
            account,
            kind: LedgerKind::Adjustment,
            amount,
            reference: &Uuid::new_v4().to_string(),
            description: None,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

pub async fn balance(pool: &DbPool, user_id: Uuid, account: LedgerAccount) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT {} FROM users WHERE id = $1",
        account.column()
    ))
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// MTN 1GB at 400..500 pesewas.
pub async fn data_bundle(pool: &DbPool) -> Bundle {
    insert_bundle(pool, BundleKind::DataBundle).await
}

/// WAEC checker at 400..500 pesewas.
pub async fn checker_bundle(pool: &DbPool) -> Bundle {
    insert_bundle(pool, BundleKind::ResultChecker).await
}

async fn insert_bundle(pool: &DbPool, kind: BundleKind) -> Bundle {
    let data = kind == BundleKind::DataBundle;
    sqlx::query_as::<_, Bundle>(
        r#"
        INSERT INTO bundles (
            kind, network, exam_board, name, capacity_mb,
            base_price, master_price, super_dealer_price, dealer_price, agent_price, user_price
        )
        VALUES ($1, $2, $3, 'Test bundle', $4, 400, 420, 440, 460, 480, 500)
        RETURNING *
        "#,
    )
    .bind(kind)
    .bind(data.then_some(Network::Mtn))
    .bind((!data).then_some("WAEC"))
    .bind(data.then_some(1024))
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn insert_storefront(pool: &DbPool, owner_id: Uuid, slug: &str) {
    sqlx::query("INSERT INTO storefronts (owner_id, slug, display_name) VALUES ($1, $2, 'Test store')")
        .bind(owner_id)
        .bind(slug)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_vouchers(pool: &DbPool, bundle_id: Uuid, count: usize) {
    for _ in 0..count {
        sqlx::query("INSERT INTO vouchers (bundle_id, serial, pin) VALUES ($1, $2, '1234')")
            .bind(bundle_id)
            .bind(Uuid::new_v4().to_string())
            .execute(pool)
            .await
            .unwrap();
    }
}

/// Order row in `status`, bypassing checkout. `paid` sets `paid_at`.
pub async fn insert_order(
    pool: &DbPool,
    bundle: &Bundle,
    buyer_id: Option<Uuid>,
    channel: PaymentChannel,
    status: TransactionStatus,
    paid: bool,
) -> Transaction {
    let reference = transaction_service::generate_reference();
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            reference, batch_reference, buyer_id, bundle_id, network, phone_number,
            quantity, unit_price, amount, customer_email, payment_channel, status, paid_at
        )
        VALUES ($1, $1, $2, $3, $4, $5, 1, 500, 500, $6, $7, $8, CASE WHEN $9 THEN NOW() END)
        RETURNING *
        "#,
    )
    .bind(&reference)
    .bind(buyer_id)
    .bind(bundle.id)
    .bind(bundle.network)
    .bind(bundle.network.map(|_| "0241234567"))
    .bind((channel == PaymentChannel::Paystack).then_some("guest@example.com"))
    .bind(channel)
    .bind(status)
    .bind(paid)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn reload(pool: &DbPool, reference: &str) -> Transaction {
    transaction_service::get_by_reference(pool, reference)
        .await
        .unwrap()
        .unwrap()
}

pub fn auth(user: &User) -> AuthContext {
    AuthContext {
        user_id: user.id,
        role: user.role,
        email: user.email.clone(),
    }
}
