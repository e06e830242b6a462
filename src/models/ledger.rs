//! Ledger models.
//!
//! Every change to a user's wallet, profit or held balance is recorded as a
//! signed `LedgerEntry` together with the resulting balance. The
//! `(user_id, account, kind, reference)` key is unique, which makes credits
//! keyed by an external reference (top-ups, refunds, commissions) idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    /// Which balance column an entry applies to.
    pub enum LedgerAccount {
        Wallet => "wallet",
        Profit => "profit",
        Held => "held",
    }
}

impl LedgerAccount {
    /// Column on `users` holding this balance.
    pub fn column(&self) -> &'static str {
        match self {
            LedgerAccount::Wallet => "wallet_balance",
            LedgerAccount::Profit => "profit_balance",
            LedgerAccount::Held => "held_balance",
        }
    }
}

text_enum! {
    pub enum LedgerKind {
        Topup => "topup",
        Purchase => "purchase",
        Refund => "refund",
        Commission => "commission",
        WithdrawalHold => "withdrawal_hold",
        WithdrawalRelease => "withdrawal_release",
        WithdrawalPaid => "withdrawal_paid",
        Adjustment => "adjustment",
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub account: LedgerAccount,
    pub kind: LedgerKind,
    /// Positive for credits, negative for debits.
    pub amount: i64,
    pub balance_after: i64,
    pub reference: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub account: Option<LedgerAccount>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// A user whose stored balance disagrees with the sum of their ledger entries.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LedgerDrift {
    pub user_id: Uuid,
    pub email: String,
    pub account: LedgerAccount,
    pub stored_balance: i64,
    pub ledger_balance: i64,
}
