//! Router configuration for the Natours API.
//!
//! Builds the complete Axum router with all endpoints.

use super::health::readiness_check;
use super::state::AppState;
use crate::api::{bookings, failed_bookings, refunds, reviews, tours, users, webhook};
use axum::{
    routing::{get, post},
    Router,
};
use natours_web::{correlation_id_layer, health_check};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Build the complete Axum router.
///
/// - `/health` and `/ready` (no authentication)
/// - `/api/v1/tours`, `/users`, `/reviews`, `/bookings`, `/refunds`,
///   `/failed-bookings`
/// - `/api/v1/webhook-checkout` for the payment provider
///
/// Every request gets a correlation ID and a tracing span.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .nest("/tours", tours::routes())
        .nest("/users", users::routes())
        .nest("/reviews", reviews::routes())
        .nest("/bookings", bookings::routes())
        .nest("/refunds", refunds::routes())
        .nest("/failed-bookings", failed_bookings::routes())
        .route("/webhook-checkout", post(webhook::webhook_checkout));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api/v1", api_routes)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
