//! Transaction data models and the fulfillment state machine.
//!
//! This module defines:
//! - `TransactionStatus`: the order lifecycle and its allowed transitions
//! - `Transaction`: Database entity; one row per recipient (or voucher batch)
//! - Request types for wallet purchases and storefront checkouts
//! - `TransactionResponse`: Response body returned to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bundle::Network;

text_enum! {
    /// Lifecycle of an order.
    ///
    /// ```text
    /// initiated → awaiting_payment → paid → dispatching → delivered
    ///     └──────────────┴─────────────┴──────────┴──→ failed → refunded
    /// initiated → paid (wallet purchases)
    /// ```
    pub enum TransactionStatus {
        Initiated => "initiated",
        AwaitingPayment => "awaiting_payment",
        Paid => "paid",
        Dispatching => "dispatching",
        Delivered => "delivered",
        Failed => "failed",
        Refunded => "refunded",
    }
}

impl TransactionStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Transitions are one-directional; `delivered` and `refunded` are terminal.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Initiated, AwaitingPayment)
                | (Initiated, Paid)
                | (Initiated, Failed)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Failed)
                | (Paid, Dispatching)
                | (Paid, Failed)
                | (Dispatching, Delivered)
                | (Dispatching, Failed)
                | (Failed, Refunded)
        )
    }
}

text_enum! {
    /// How the buyer paid.
    pub enum PaymentChannel {
        /// Debited from the buyer's prepaid wallet.
        Wallet => "wallet",
        /// Card / mobile money through Paystack (storefront guests).
        Paystack => "paystack",
    }
}

/// Represents a transaction record from the database.
///
/// # Database Table
///
/// Maps to the `transactions` table. Each transaction:
/// - Has a unique `reference`, used as the Paystack reference and as the
///   provider idempotency key
/// - Targets one phone number (data bundles) or carries a voucher `quantity`
/// - Stores amounts in pesewas
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    /// Shared by all transactions created by one purchase request.
    pub batch_reference: String,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    /// `None` for storefront guests.
    pub buyer_id: Option<Uuid>,
    pub storefront_id: Option<Uuid>,
    pub bundle_id: Uuid,
    pub network: Option<Network>,
    pub phone_number: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub amount: i64,
    pub customer_email: Option<String>,
    pub payment_channel: PaymentChannel,
    pub status: TransactionStatus,
    pub attempts: i32,
    /// While dispatching: `Some` means a retry is scheduled, `None` means in flight.
    pub retry_at: Option<DateTime<Utc>>,
    pub provider_reference: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Wallet purchase by an authenticated user or API key.
///
/// # JSON Example
///
/// ```json
/// {
///   "bundle_id": "550e8400-e29b-41d4-a716-446655440000",
///   "phone_numbers": ["0241234567", "+233551234567"],
///   "idempotency_key": "order-2025-001"
/// }
/// ```
///
/// Result-checker purchases omit `phone_numbers` and set `quantity`.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub bundle_id: Uuid,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    pub quantity: Option<i32>,
    pub idempotency_key: Option<String>,
}

/// Guest checkout on a storefront.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub bundle_id: Uuid,
    pub phone_number: Option<String>,
    pub quantity: Option<i32>,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub reference: String,
    pub amount: i64,
    pub authorization_url: String,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub batch_reference: String,
    pub total_amount: i64,
    pub wallet_balance: i64,
    pub transactions: Vec<TransactionResponse>,
}

/// Outcome of confirming a Paystack reference (order or wallet top-up).
#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub reference: String,
    /// `order` or `topup`.
    pub kind: &'static str,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<TransactionStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Response returned for transaction endpoints.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub reference: String,
    pub batch_reference: String,
    pub bundle_id: Uuid,
    pub network: Option<Network>,
    pub phone_number: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub amount: i64,
    pub payment_channel: PaymentChannel,
    pub status: TransactionStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Convert database Transaction to API TransactionResponse.
///
/// This removes internal fields like retry scheduling and the idempotency key.
impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            reference: t.reference,
            batch_reference: t.batch_reference,
            bundle_id: t.bundle_id,
            network: t.network,
            phone_number: t.phone_number,
            quantity: t.quantity,
            unit_price: t.unit_price,
            amount: t.amount,
            payment_channel: t.payment_channel,
            status: t.status,
            attempts: t.attempts,
            last_error: t.last_error,
            created_at: t.created_at,
            delivered_at: t.delivered_at,
        }
    }
}

text_enum! {
    pub enum CommissionStatus {
        Pending => "pending",
        Credited => "credited",
        Void => "void",
    }
}

/// Pending margin owed to one upline member for one transaction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Commission {
    pub id: Uuid,
    pub beneficiary_id: Uuid,
    pub amount: i64,
}

#[cfg(test)]
mod tests {
    use super::TransactionStatus::*;
    use super::*;

    #[test]
    fn happy_paths_are_allowed() {
        let wallet = [Initiated, Paid, Dispatching, Delivered];
        let paystack = [Initiated, AwaitingPayment, Paid, Dispatching, Delivered];
        for path in [&wallet[..], &paystack[..]] {
            for pair in path.windows(2) {
                assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn every_live_state_can_fail_and_failure_refunds() {
        for status in [Initiated, AwaitingPayment, Paid, Dispatching] {
            assert!(status.can_transition_to(Failed));
        }
        assert!(Failed.can_transition_to(Refunded));
    }

    #[test]
    fn no_transition_goes_backwards() {
        assert!(!Paid.can_transition_to(AwaitingPayment));
        assert!(!Dispatching.can_transition_to(Paid));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Refunded.can_transition_to(Failed));
        assert!(!AwaitingPayment.can_transition_to(Dispatching));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [Delivered, Refunded] {
            for to in TransactionStatus::ALL {
                assert!(!from.can_transition_to(*to));
            }
        }
    }
}
