//! Shared application state handed to every handler and background worker.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::{
    config::Config,
    db::DbPool,
    services::{paystack::PaystackClient, providers::ProviderRegistry},
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub paystack: PaystackClient,
    pub providers: Arc<ProviderRegistry>,
    /// Wakes the dispatcher as soon as new paid orders exist.
    pub dispatch_signal: Arc<Notify>,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        config: Config,
        paystack: PaystackClient,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            paystack,
            providers: Arc::new(providers),
            dispatch_signal: Arc::new(Notify::new()),
        }
    }

    pub fn wake_dispatcher(&self) {
        self.dispatch_signal.notify_one();
    }
}
