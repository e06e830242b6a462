//! Router assembly.
//!
//! Public routes (storefront, Paystack callbacks, receipts) are merged with
//! the authenticated group, which sits behind the bearer middleware. Admin
//! routes live in the authenticated group; their handlers check the role.

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers, middleware, state::AppState};

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/auth/register", post(handlers::auth::register))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/store/{slug}", get(handlers::storefronts::get_public))
        .route(
            "/api/v1/store/{slug}/checkout",
            post(handlers::storefronts::checkout),
        )
        .route(
            "/api/v1/paystack/webhook",
            post(handlers::payments::paystack_webhook),
        )
        .route(
            "/api/v1/payments/verify/{reference}",
            get(handlers::payments::verify_payment),
        )
        .route(
            "/api/v1/orders/{reference}/receipt",
            get(handlers::orders::receipt),
        )
        .route(
            "/api/v1/settings/break-mode",
            get(handlers::settings::get_break_mode),
        );

    let authenticated_routes = Router::new()
        // Session and profile
        .route("/api/v1/auth/logout", post(handlers::auth::logout))
        .route("/api/v1/me", get(handlers::auth::me))
        .route("/api/v1/me/ledger", get(handlers::auth::my_ledger))
        .route(
            "/api/v1/api-keys",
            post(handlers::auth::create_api_key).get(handlers::auth::list_api_keys),
        )
        .route(
            "/api/v1/api-keys/{id}",
            delete(handlers::auth::revoke_api_key),
        )
        // Downline
        .route(
            "/api/v1/users",
            post(handlers::users::create_user).get(handlers::users::list_users),
        )
        .route("/api/v1/users/{id}", get(handlers::users::get_user))
        // Catalogue and storefront
        .route("/api/v1/bundles", get(handlers::bundles::list_bundles))
        .route(
            "/api/v1/storefront",
            get(handlers::storefronts::get_mine).put(handlers::storefronts::upsert),
        )
        .route(
            "/api/v1/storefront/prices",
            put(handlers::storefronts::set_prices),
        )
        // Orders and wallet
        .route(
            "/api/v1/orders",
            post(handlers::orders::purchase).get(handlers::orders::list_orders),
        )
        .route("/api/v1/orders/{reference}", get(handlers::orders::get_order))
        .route(
            "/api/v1/wallet/topups",
            post(handlers::payments::initialize_topup).get(handlers::payments::list_topups),
        )
        .route(
            "/api/v1/withdrawals",
            post(handlers::withdrawals::request_withdrawal)
                .get(handlers::withdrawals::list_withdrawals),
        )
        .route(
            "/api/v1/announcements",
            get(handlers::announcements::list_active),
        )
        // Support
        .route(
            "/api/v1/support/chats",
            post(handlers::support::open_chat).get(handlers::support::list_chats),
        )
        .route(
            "/api/v1/support/chats/{id}/messages",
            get(handlers::support::list_messages).post(handlers::support::post_message),
        )
        .route(
            "/api/v1/support/chats/{id}/close",
            post(handlers::support::close_chat),
        )
        // Admin
        .route(
            "/api/v1/admin/users/{id}/role",
            put(handlers::users::set_role),
        )
        .route(
            "/api/v1/admin/users/{id}/active",
            put(handlers::users::set_active),
        )
        .route(
            "/api/v1/admin/users/{id}/wallet-adjustments",
            post(handlers::users::adjust_wallet),
        )
        .route(
            "/api/v1/admin/bundles",
            get(handlers::bundles::list_all).post(handlers::bundles::create_bundle),
        )
        .route(
            "/api/v1/admin/bundles/{id}",
            put(handlers::bundles::update_bundle).delete(handlers::bundles::deactivate_bundle),
        )
        .route(
            "/api/v1/admin/bundles/{id}/vouchers",
            post(handlers::bundles::upload_vouchers).get(handlers::bundles::voucher_stock),
        )
        .route(
            "/api/v1/admin/withdrawals/{id}/approve",
            post(handlers::withdrawals::approve),
        )
        .route(
            "/api/v1/admin/withdrawals/{id}/reject",
            post(handlers::withdrawals::reject),
        )
        .route(
            "/api/v1/admin/withdrawals/{id}/paid",
            post(handlers::withdrawals::mark_paid),
        )
        .route(
            "/api/v1/admin/announcements",
            get(handlers::announcements::list_all).post(handlers::announcements::create),
        )
        .route(
            "/api/v1/admin/announcements/{id}",
            delete(handlers::announcements::delete),
        )
        .route(
            "/api/v1/admin/announcements/{id}/active",
            put(handlers::announcements::set_active),
        )
        .route(
            "/api/v1/admin/settings/break-mode",
            put(handlers::settings::set_break_mode),
        )
        .route(
            "/api/v1/admin/reports/ledger-drift",
            get(handlers::admin::ledger_drift),
        )
        .route("/api/v1/admin/reconcile", post(handlers::admin::reconcile_now))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // The storefront SPA is served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        services::{
            paystack::{PaystackClient, SIGNATURE_HEADER},
            providers::ProviderRegistry,
        },
    };
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    /// Router over a pool that never connects; only paths that stop before the
    /// database are exercised.
    fn router() -> Router {
        let config = test_config();
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        let paystack = PaystackClient::new(
            &config.paystack_base_url,
            &config.paystack_secret_key,
            None,
        )
        .expect("paystack client");
        build_router(AppState::new(pool, config, paystack, ProviderRegistry::new()))
    }

    async fn error_code(response: axum::response::Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        json["error"]["code"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn authenticated_routes_require_a_bearer_token() {
        let response = router()
            .oneshot(Request::builder().uri("/api/v1/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "unauthorized");
    }

    #[tokio::test]
    async fn non_bearer_authorization_is_rejected() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/orders")
                    .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_rejected() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/paystack/webhook")
                    .header(SIGNATURE_HEADER, "00ff")
                    .body(Body::from(r#"{"event":"charge.success","data":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_without_signature_is_rejected() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/v1/paystack/webhook")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cors_preflight_is_answered() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/v1/store/kofi-data/checkout")
                    .header(header::ORIGIN, "https://shop.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }
}
