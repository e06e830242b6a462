//! Data-bundle reseller server - main entry point.
//!
//! An HTTP/JSON API for selling mobile data bundles and exam result-checker
//! vouchers through a reseller hierarchy, with Paystack payments, wallet and
//! profit balances, and per-reseller storefronts.
//!
//! # Architecture
//!
//! - **Web framework**: Axum
//! - **Database**: PostgreSQL with sqlx, every balance change recorded in a ledger
//! - **Authentication**: session tokens and API keys, stored as SHA-256 hashes
//! - **Background workers**: the dispatcher delivers paid orders, the
//!   reconciler repairs payments, deliveries and refunds left in limbo
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create the database pool and run migrations
//! 3. Create the bootstrap admin if configured
//! 4. Build the Paystack and provider clients
//! 5. Spawn the dispatcher and reconciler
//! 6. Serve HTTP until Ctrl-C, then stop the workers

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;
mod validation;

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::{
    services::{
        dispatcher,
        paystack::PaystackClient,
        providers::{HttpBundleProvider, ProviderRegistry},
        reconciler,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity, "info" by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(port = config.server_port, "configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("database migrations complete");

    if let (Some(email), Some(password)) = (
        config.bootstrap_admin_email.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) {
        if db::ensure_admin(&pool, email, password).await? {
            tracing::info!(%email, "bootstrap admin created");
        }
    }

    let paystack = PaystackClient::new(
        &config.paystack_base_url,
        &config.paystack_secret_key,
        config.paystack_callback_url.clone(),
    )?;
    let provider = HttpBundleProvider::new(
        "bulk-api",
        &config.provider_base_url,
        &config.provider_api_key,
        &config.provider_api_secret,
        Duration::from_secs(config.provider_timeout_secs),
    )?;
    let providers = ProviderRegistry::single(Arc::new(provider));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let state = AppState::new(pool, config, paystack, providers);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_task = tokio::spawn(dispatcher::run(state.clone(), shutdown_rx.clone()));
    let reconciler_task = tokio::spawn(reconciler::run(state.clone(), shutdown_rx));

    let app = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Workers finish their current batch before exiting
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(dispatcher_task, reconciler_task);
    tracing::info!("server stopped");

    Ok(())
}
