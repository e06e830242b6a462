//! Database connection pool and migration management.
//!
//! This module provides utilities for:
//! - Creating and managing a PostgreSQL connection pool
//! - Running database migrations automatically
//! - Seeding the first admin account

use sqlx::{Pool, Postgres};

use crate::{error::AppError, services::auth_service};

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// A connection pool maintains multiple database connections that are reused across
/// HTTP requests and the background workers.
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server is unreachable.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each one runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    // The macro reads migrations at compile time from ./migrations directory
    sqlx::migrate!("./migrations").run(pool).await
}

/// Create the first admin account if none exists.
///
/// Returns `true` when an admin was inserted.
pub async fn ensure_admin(pool: &DbPool, email: &str, password: &str) -> Result<bool, AppError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE role = 'admin')")
        .fetch_one(pool)
        .await?;

    if exists {
        return Ok(false);
    }

    let password_hash = auth_service::hash_password(password)?;

    sqlx::query(
        r#"
        INSERT INTO users (email, full_name, password_hash, role)
        VALUES ($1, 'Administrator', $2, 'admin')
        "#,
    )
    .bind(email.trim().to_lowercase())
    .bind(password_hash)
    .execute(pool)
    .await?;

    Ok(true)
}
