//! Profit withdrawal models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    /// `pending → approved → paid`, with `rejected` reachable from pending or approved.
    pub enum WithdrawalStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Paid => "paid",
    }
}

impl WithdrawalStatus {
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Rejected) | (Approved, Paid)
        )
    }
}

text_enum! {
    pub enum PayoutMethod {
        /// Mobile money wallet.
        Momo => "momo",
        Bank => "bank",
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Withdrawal {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub method: PayoutMethod,
    pub account_name: String,
    pub account_number: String,
    /// Mobile network or bank name.
    pub provider: String,
    pub status: WithdrawalStatus,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: i64,
    pub method: PayoutMethod,
    pub account_name: String,
    pub account_number: String,
    pub provider: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewWithdrawalRequest {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListWithdrawalsQuery {
    pub status: Option<WithdrawalStatus>,
}
