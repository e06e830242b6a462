//! Authentication service: passwords, sessions and API keys.
//!
//! - Passwords are hashed with argon2 (PHC string format).
//! - Session tokens and API keys are random 32-byte values shown to the
//!   client once; only their SHA-256 hex digest is stored.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, conflict_on_unique},
    middleware::auth::AuthContext,
    models::{
        api_key::{API_KEY_PREFIX, ApiKey, ApiKeyResponse},
        user::{LoginResponse, RegisterRequest, Role, User},
    },
    services::user_service,
    validation,
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// SHA-256 hex digest used to store tokens and API keys.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// 64 hex characters (32 random bytes).
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// Register a customer account.
///
/// The upline is the owner of `referral_slug` when given, otherwise the first
/// admin. Either way it must outrank a `user`.
pub async fn register(pool: &DbPool, request: RegisterRequest) -> Result<User, AppError> {
    let email = validation::normalize_email(&request.email)?;
    let full_name = validation::require_text(&request.full_name, "full_name", 120)?;
    let phone = request
        .phone
        .as_deref()
        .map(validation::normalize_phone)
        .transpose()?;
    let password_hash = hash_password(&request.password)?;

    let parent: Option<(Uuid, Role)> = match request.referral_slug.as_deref() {
        Some(slug) => Some(
            sqlx::query_as(
                r#"
                SELECT u.id, u.role FROM storefronts s
                JOIN users u ON u.id = s.owner_id
                WHERE s.slug = $1
                "#,
            )
            .bind(slug.trim().to_lowercase())
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::NotFound("Storefront"))?,
        ),
        None => sqlx::query_as(
            "SELECT id, role FROM users WHERE role = 'admin' ORDER BY created_at LIMIT 1",
        )
        .fetch_optional(pool)
        .await?,
    };
    // The storefront owner may have been demoted since the link was shared
    user_service::check_parent(Role::User, parent.map(|(_, role)| role))?;
    let parent_id = parent.map(|(id, _)| id);

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, full_name, phone, password_hash, role, parent_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(full_name)
    .bind(phone)
    .bind(password_hash)
    .bind(Role::User)
    .bind(parent_id)
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_on_unique(e, "An account with this email already exists"))?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// Verify credentials and issue a session token.
pub async fn login(
    pool: &DbPool,
    email: &str,
    password: &str,
    ttl_hours: i64,
) -> Result<LoginResponse, AppError> {
    let email = email.trim().to_lowercase();
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !user.is_active || !verify_password(password, &user.password_hash) {
        return Err(AppError::Unauthorized);
    }

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    sqlx::query("INSERT INTO sessions (user_id, token_hash, expires_at) VALUES ($1, $2, $3)")
        .bind(user.id)
        .bind(hash_token(&token))
        .bind(expires_at)
        .execute(pool)
        .await?;

    // Opportunistic cleanup of this user's expired sessions
    sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at < NOW()")
        .bind(user.id)
        .execute(pool)
        .await?;

    tracing::info!(user_id = %user.id, "session issued");

    Ok(LoginResponse {
        token,
        expires_at,
        user: user.into(),
    })
}

pub async fn logout(pool: &DbPool, token: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(hash_token(token))
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve a bearer credential (session token or `dbk_` API key) to its user.
pub async fn resolve_bearer(pool: &DbPool, token: &str) -> Result<AuthContext, AppError> {
    let token_hash = hash_token(token);

    let row: Option<(Uuid, Role, String, bool)> = if token.starts_with(API_KEY_PREFIX) {
        let row = sqlx::query_as(
            r#"
            SELECT u.id, u.role, u.email, u.is_active
            FROM api_keys k JOIN users u ON u.id = k.user_id
            WHERE k.key_hash = $1 AND k.is_active = true
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(pool)
        .await?;

        if row.is_some() {
            sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE key_hash = $1")
                .bind(&token_hash)
                .execute(pool)
                .await?;
        }
        row
    } else {
        sqlx::query_as(
            r#"
            SELECT u.id, u.role, u.email, u.is_active
            FROM sessions s JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1 AND s.expires_at > NOW()
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(pool)
        .await?
    };

    match row {
        Some((user_id, role, email, true)) => Ok(AuthContext {
            user_id,
            role,
            email,
        }),
        _ => Err(AppError::Unauthorized),
    }
}

/// Mint a new API key for `user_id`. The plaintext key is only in this response.
pub async fn create_api_key(
    pool: &DbPool,
    user_id: Uuid,
    label: &str,
) -> Result<ApiKeyResponse, AppError> {
    let label = validation::require_text(label, "label", 60)?;
    let key = format!("{API_KEY_PREFIX}{}", generate_token());

    let record = sqlx::query_as::<_, ApiKey>(
        r#"
        INSERT INTO api_keys (user_id, key_hash, label)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(hash_token(&key))
    .bind(label)
    .fetch_one(pool)
    .await?;

    tracing::info!(user_id = %user_id, api_key_id = %record.id, "api key created");
    Ok(ApiKeyResponse::from(record).with_key(key))
}

pub async fn list_api_keys(pool: &DbPool, user_id: Uuid) -> Result<Vec<ApiKeyResponse>, AppError> {
    let keys = sqlx::query_as::<_, ApiKey>(
        "SELECT * FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(keys.into_iter().map(Into::into).collect())
}

/// Revoke (soft delete) one of the caller's keys.
pub async fn revoke_api_key(pool: &DbPool, user_id: Uuid, key_id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE api_keys SET is_active = false WHERE id = $1 AND user_id = $2 AND is_active = true",
    )
    .bind(key_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("API key"));
    }
    Ok(())
}
