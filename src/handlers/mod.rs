//! HTTP request handlers.
//!
//! Each handler extracts its input (path, query, JSON body, `AuthContext`),
//! checks the caller's role where the route needs one, delegates to a service
//! and shapes the response.

pub mod admin;
pub mod announcements;
/// Registration, sessions and API keys
pub mod auth;
pub mod bundles;
pub mod health;
pub mod orders;
/// Paystack webhook, payment verification and wallet top-ups
pub mod payments;
pub mod settings;
pub mod storefronts;
pub mod support;
pub mod users;
pub mod withdrawals;
