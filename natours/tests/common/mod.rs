//! Shared harness for HTTP tests: the real router over in-memory
//! repositories, the mock payment gateway and a recording email provider.

#![allow(dead_code)]
#![allow(clippy::expect_used)]

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use natours::auth::{generate_token, hash_token};
use natours::config::Config;
use natours::mocks::{InMemoryDatabase, MockPaymentGateway, RecordingEmailProvider};
use natours::models::{Tour, User};
use natours::payment_gateway::CheckoutSessionRequest;
use natours::repositories::Repositories;
use natours::server::{build_router, AppState};
use natours_core::environment::SystemClock;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Webhook secret used by every test app
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// A running app and handles on its fakes.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: InMemoryDatabase,
    pub gateway: MockPaymentGateway,
    pub email: RecordingEmailProvider,
}

impl TestApp {
    pub fn new() -> Self {
        let config = Config::from_lookup(|key| match key {
            "STRIPE_WEBHOOK_SECRET" => Some(WEBHOOK_SECRET.into()),
            "AUTH_EXPOSE_MAGIC_LINKS_FOR_TESTING" => Some("true".into()),
            "PUBLIC_BASE_URL" => Some("https://natours.test".into()),
            _ => None,
        });
        let db = InMemoryDatabase::new();
        let gateway = MockPaymentGateway::new();
        let email = RecordingEmailProvider::new();
        let state = AppState::new(
            config,
            db.repositories(),
            Arc::new(gateway.clone()),
            Arc::new(email.clone()),
            Arc::new(SystemClock),
        );
        Self {
            router: build_router(state.clone()),
            state,
            db,
            gateway,
            email,
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.state.repositories
    }

    /// Store `user` and open a session for them; returns the bearer token.
    pub async fn sign_in(&self, user: &User) -> String {
        self.repositories().users.insert(user).await.expect("insert user");
        let token = generate_token();
        self.repositories()
            .sessions
            .create_session(&hash_token(&token), user.id, Utc::now() + Duration::days(1))
            .await
            .expect("create session");
        token
    }

    pub async fn add_tour(&self, tour: &Tour) {
        self.repositories().tours.insert(tour).await.expect("insert tour");
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            },
            None => Body::empty(),
        };
        let request = builder.body(body).expect("request");
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::PATCH, uri, token, Some(body)).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    /// The checkout session request most recently sent to the gateway.
    pub fn last_checkout(&self) -> CheckoutSessionRequest {
        self.gateway
            .checkout_requests()
            .pop()
            .expect("a checkout session was requested")
    }

    /// Deliver a signed `checkout.session.completed` event.
    pub async fn complete_checkout(
        &self,
        session_id: &str,
        request: &CheckoutSessionRequest,
        payment_intent: &str,
    ) -> (StatusCode, Value) {
        let payload = completed_event(session_id, request, payment_intent);
        let signature = self.state.webhooks.sign(&payload, Utc::now().timestamp());
        self.deliver_webhook(payload, Some(&signature)).await
    }

    pub async fn deliver_webhook(&self, payload: Vec<u8>, signature: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhook-checkout")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("stripe-signature", signature);
        }
        self.send(builder.body(Body::from(payload)).expect("request")).await
    }
}

/// The body Stripe sends once the hosted checkout is paid.
pub fn completed_event(session_id: &str, request: &CheckoutSessionRequest, payment_intent: &str) -> Vec<u8> {
    let metadata: serde_json::Map<String, Value> = request
        .metadata
        .to_pairs()
        .into_iter()
        .map(|(key, value)| (key.to_string(), Value::String(value)))
        .collect();
    let amount = request.line_item.unit_amount.multiply(request.line_item.quantity);
    serde_json::to_vec(&json!({
        "id": format!("evt_{payment_intent}"),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_intent": payment_intent,
            "amount_total": amount.cents(),
            "customer_email": request.customer_email,
            "metadata": metadata,
        }}
    }))
    .expect("event json")
}
