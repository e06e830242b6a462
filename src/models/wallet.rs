//! Wallet top-up models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    pub enum TopupStatus {
        Pending => "pending",
        Success => "success",
        Failed => "failed",
    }
}

/// A Paystack payment that credits the payer's wallet once confirmed.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WalletTopup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub amount: i64,
    pub status: TopupStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct TopupRequest {
    /// Amount in pesewas.
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct TopupResponse {
    pub reference: String,
    pub amount: i64,
    pub authorization_url: String,
}
