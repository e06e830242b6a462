//! Business logic layer.
//!
//! Services own the database queries and the integration calls; handlers
//! only extract input, check roles and shape responses.

pub mod announcement_service;
pub mod auth_service;
pub mod bundle_service;
pub mod checkout_service;
/// Fulfillment worker
pub mod dispatcher;
pub mod ledger_service;
pub mod paystack;
pub mod pricing;
/// Bundle delivery providers
pub mod providers;
pub mod receipt;
/// Periodic payment / delivery / refund reconciliation
pub mod reconciler;
pub mod settings_service;
pub mod storefront_service;
pub mod support_service;
pub mod transaction_service;
pub mod user_service;
pub mod wallet_service;
pub mod withdrawal_service;
