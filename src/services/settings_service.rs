//! Site settings (break mode).

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::settings::{BREAK_MODE_KEY, BreakMode},
};

pub async fn get_break_mode(pool: &DbPool) -> Result<BreakMode, AppError> {
    let value: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT value FROM site_settings WHERE key = $1")
            .bind(BREAK_MODE_KEY)
            .fetch_optional(pool)
            .await?;

    match value {
        // A malformed row must not block sales
        Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring malformed break_mode setting");
            BreakMode::default()
        })),
        None => Ok(BreakMode::default()),
    }
}

pub async fn set_break_mode(pool: &DbPool, mode: BreakMode) -> Result<BreakMode, AppError> {
    let value = serde_json::to_value(&mode)
        .map_err(|e| AppError::Internal(format!("break mode serialization: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO site_settings (key, value) VALUES ($1, $2)
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        "#,
    )
    .bind(BREAK_MODE_KEY)
    .bind(value)
    .execute(pool)
    .await?;

    tracing::info!(enabled = mode.enabled, "break mode updated");
    Ok(mode)
}

/// Reject purchases while break mode is on. Admins (`caller`) bypass it.
pub async fn ensure_open(pool: &DbPool, caller: Option<&AuthContext>) -> Result<(), AppError> {
    if caller.is_some_and(AuthContext::is_admin) {
        return Ok(());
    }
    let mode = get_break_mode(pool).await?;
    if mode.enabled {
        return Err(AppError::ServiceUnavailable(mode.buyer_message()));
    }
    Ok(())
}
