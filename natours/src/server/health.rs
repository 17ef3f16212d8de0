//! Readiness probe.
//!
//! Liveness (`/health`) comes from `natours_web`; readiness also checks the
//! database and both workflow stores.

use super::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use natours_runtime::{HealthCheck, HealthReport};
use natours_web::readiness_response;

/// Readiness check endpoint.
///
/// Returns 200 while the database answers and the stores accept work,
/// 503 otherwise.
///
/// # Example
///
/// ```bash
/// curl http://localhost:3000/ready
/// # {"status":"healthy","checks":[...]}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let database = match state.repositories.database.ping().await {
        Ok(()) => HealthCheck::healthy("database"),
        Err(e) => HealthCheck::unhealthy("database", e.to_string()),
    };

    readiness_response(HealthReport::new(vec![
        database,
        state.checkout.health("checkout_store"),
        state.refunds.health("refund_store"),
    ]))
}
