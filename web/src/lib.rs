//! Axum integration for Natours.
//!
//! This crate is the imperative shell shared by the Natours HTTP API: it
//! turns domain failures into JSON error responses, wraps successful
//! payloads in the `{"status":"success"}` envelope, tags every request with
//! a correlation id and serves the liveness probe.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract data** from the request (JSON, path, query, bearer token)
//! 3. **Call** a repository directly, or build an action and dispatch it
//!    through a `Store` with `send_and_wait_for`
//! 4. **Map result** to an [`ApiResponse`] or an [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use natours_web::{ApiResponse, AppError};
//!
//! async fn get_tour(
//!     State(state): State<AppState>,
//!     Path(id): Path<TourId>,
//! ) -> Result<ApiResponse<Tour>, AppError> {
//!     let tour = state.tours.find(id).await?.ok_or_else(|| AppError::not_found("Tour", id))?;
//!     Ok(ApiResponse::ok(tour))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod response;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{ClientIp, CorrelationId, UserAgent};
pub use handlers::{health_check, readiness_response};
pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use response::ApiResponse;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
