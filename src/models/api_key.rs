//! API Key model for reseller integrations.
//!
//! Resellers use API keys to buy bundles from their own systems. Keys are stored
//! in the database as SHA-256 hashes; the plaintext is only returned at creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix that distinguishes API keys from session tokens in the `Authorization` header.
pub const API_KEY_PREFIX: &str = "dbk_";

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier (UUID)
/// - `user_id`: Reseller who owns the key; requests act as this user
/// - `key_hash`: SHA-256 hash of the actual API key
/// - `label`: Free-form name chosen by the owner
/// - `is_active`: Whether the key is currently valid
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,

    pub user_id: Uuid,

    /// SHA-256 hash of the actual API key (64 hex characters)
    ///
    /// When a request comes in with "Bearer dbk_abc123", we:
    /// 1. Hash "dbk_abc123" with SHA-256
    /// 2. Look up this hash in the database
    /// 3. If found and active, authenticate the request as `user_id`
    pub key_hash: String,

    pub label: String,

    /// Revoked keys are kept for audit but rejected during authentication.
    pub is_active: bool,

    pub last_used_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub label: String,
}

/// API key as returned to the owner. `key` is only present right after creation.
#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            label: key.label,
            key: None,
            is_active: key.is_active,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}

impl ApiKeyResponse {
    /// Attach the plaintext key (only for creation).
    pub fn with_key(mut self, key: String) -> Self {
        self.key = Some(key);
        self
    }
}
