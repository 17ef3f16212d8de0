//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{http::StatusCode, Json};
use natours_runtime::{HealthReport, HealthStatus};
use serde_json::{json, Value};

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT check dependencies (database, etc.).
///
/// # Response
///
/// ```json
/// { "status": "ok" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Turn an aggregated health report into a readiness response.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
#[must_use]
pub fn readiness_response(report: HealthReport) -> (StatusCode, Json<HealthReport>) {
    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use natours_runtime::HealthCheck;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn test_readiness_ok_when_degraded() {
        let report = HealthReport::new(vec![
            HealthCheck::healthy("database"),
            HealthCheck::degraded("checkout_store", "draining 2 effects"),
        ]);

        let (status, Json(report)) = readiness_response(report);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_readiness_unavailable_when_unhealthy() {
        let report = HealthReport::new(vec![HealthCheck::unhealthy(
            "database",
            "connection refused",
        )]);

        let (status, _) = readiness_response(report);

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
