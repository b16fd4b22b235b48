// routes.rs
use std::sync::Arc;

use axum::{middleware, routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::{
        balance::balance_handler, escrow::escrow_handler, payment_methods::payment_methods_handler,
        payments::payments_handler, withdrawals::withdrawals_handler,
    },
    middleware::auth,
    AppState,
};

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running"
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_route = Router::new()
        .nest(
            "/payments",
            payments_handler(app_state.payment_limiter.clone(), app_state.webhook_limiter.clone()),
        )
        .nest("/escrow", escrow_handler().layer(middleware::from_fn(auth)))
        .nest("/withdrawals", withdrawals_handler().layer(middleware::from_fn(auth)))
        .nest("/balance", balance_handler().layer(middleware::from_fn(auth)))
        .nest(
            "/payment-methods",
            payment_methods_handler().layer(middleware::from_fn(auth)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use bigdecimal::BigDecimal;
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    use crate::{
        config::Config,
        db::memory::MemoryLedger,
        models::usermodel::{User, UserRole},
        service::payment_provider::testing::StubGateway,
        utils::{clock::SystemClock, signature::compute_signature, token::create_token},
    };

    struct Harness {
        app: Router,
        store: Arc<MemoryLedger>,
        gateway: Arc<StubGateway>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryLedger::new());
        let gateway = Arc::new(StubGateway::default());
        let state = AppState::new(
            Config::test_config(),
            store.clone(),
            gateway.clone(),
            Arc::new(SystemClock),
        );
        Harness {
            app: create_router(Arc::new(state)),
            store,
            gateway,
        }
    }

    async fn seasoned_user(store: &MemoryLedger, role: UserRole) -> User {
        store.add_user(role, Utc::now() - Duration::days(90)).await
    }

    fn bearer(user: &User) -> String {
        let token = create_token(&user.id.to_string(), b"test-jwt-secret", 600).unwrap();
        format!("Bearer {}", token)
    }

    fn signed_webhook(payload: &str, secret: &str) -> Request<Body> {
        let signature = hex::encode(compute_signature(secret, payload.as_bytes()).unwrap());
        Request::builder()
            .method("POST")
            .uri("/api/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-signature", signature)
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_responds() {
        let h = harness();
        let response = h
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature() {
        let h = harness();
        let payload = r#"{"id":"evt-1","type":"payment","data":{"id":"123","status":"approved"}}"#;
        let response = h.app.oneshot(signed_webhook(payload, "wrong-secret")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"], "GATEWAY_SIGNATURE_INVALID");
        assert_eq!(h.store.webhook_event_count().await, 0);
    }

    #[tokio::test]
    async fn webhook_acknowledges_unknown_transactions() {
        let h = harness();
        let payload = r#"{"id":"evt-2","type":"payment","data":{"id":"999","status":"approved"}}"#;
        let response = h.app.oneshot(signed_webhook(payload, "test-webhook-secret")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["received"], true);
        assert_eq!(body["result"]["outcome"], "unknown_transaction");
    }

    #[tokio::test]
    async fn requests_without_token_are_rejected() {
        let h = harness();
        let response = h
            .app
            .oneshot(Request::builder().uri("/api/balance").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn balance_includes_withdrawal_limits() {
        let h = harness();
        let freelancer = seasoned_user(&h.store, UserRole::Freelancer).await;

        let response = h
            .app
            .oneshot(
                Request::builder()
                    .uri("/api/balance")
                    .header(header::AUTHORIZATION, bearer(&freelancer))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let available: BigDecimal = body["data"]["available_balance"].as_str().unwrap().parse().unwrap();
        assert_eq!(available, BigDecimal::from(0));
        assert!(body["data"]["withdrawal_limits"]["min"].is_string());
    }

    #[tokio::test]
    async fn auto_release_sweep_is_admin_only() {
        let h = harness();
        let client = seasoned_user(&h.store, UserRole::Client).await;

        let response = h
            .app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/escrow/auto-release")
                    .header(header::AUTHORIZATION, bearer(&client))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn created_payment_hides_risk_score_and_settles_via_webhook() {
        let h = harness();
        let client = seasoned_user(&h.store, UserRole::Client).await;
        let freelancer = seasoned_user(&h.store, UserRole::Freelancer).await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/payments")
            .header(header::AUTHORIZATION, bearer(&client))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "payee_id": freelancer.id,
                    "amount": "5000.00",
                    "transaction_type": "payment",
                })
                .to_string(),
            ))
            .unwrap();

        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = json_body(response).await;
        let transaction = &body["data"]["transaction"];
        assert_eq!(transaction["status"], "pending");
        assert!(transaction.get("risk_score").is_none());
        assert!(transaction.get("ip_address").is_none());
        assert!(body["data"]["checkout_url"].is_string());
        assert_eq!(h.gateway.charges_created.load(std::sync::atomic::Ordering::SeqCst), 1);

        let transaction_id = transaction["id"].as_str().unwrap().to_string();
        let payload = json!({
            "id": "evt-approved",
            "type": "payment",
            "data": {
                "id": "mp-555",
                "status": "approved",
                "external_reference": transaction_id,
            }
        })
        .to_string();

        let response = h
            .app
            .clone()
            .oneshot(signed_webhook(&payload, "test-webhook-secret"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["result"]["outcome"], "processed");
        assert_eq!(body["result"]["status"], "completed");

        // Redelivery of the same event is acknowledged without a second transition.
        let response = h
            .app
            .oneshot(signed_webhook(&payload, "test-webhook-secret"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["result"]["outcome"], "duplicate");
    }
}
