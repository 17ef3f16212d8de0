//! Failed booking records for operators.
//!
//! A paid checkout that could not be written is recorded once and stays
//! listed until an admin marks it resolved.

use crate::auth::RequireAdmin;
use crate::error::NatoursError;
use crate::models::FailedBooking;
use crate::server::state::AppState;
use crate::types::FailedBookingId;
use axum::{
    extract::{Path, State},
    routing::{get, patch},
    Router,
};
use natours_web::{ApiResponse, AppError};

/// `GET /failed-bookings`, newest first
///
/// # Errors
///
/// 401/403 for non-admins.
pub async fn list_failed_bookings(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Result<ApiResponse<Vec<FailedBooking>>, AppError> {
    let failed = state
        .repositories
        .failed_bookings
        .list()
        .await
        .map_err(NatoursError::from)?;
    Ok(ApiResponse::list(failed))
}

/// `PATCH /failed-bookings/:id/resolve`
///
/// # Errors
///
/// 404 unknown record.
pub async fn resolve_failed_booking(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<FailedBookingId>,
) -> Result<ApiResponse<FailedBooking>, AppError> {
    let resolved = state
        .repositories
        .failed_bookings
        .resolve(id, state.clock.now())
        .await
        .map_err(NatoursError::from)?
        .ok_or_else(|| NatoursError::not_found("Failed booking", id))?;
    tracing::info!(
        failed_booking_id = %id,
        session_id = %resolved.session_id,
        resolved_by = %admin.user.id,
        "Failed booking resolved"
    );
    Ok(ApiResponse::ok(resolved))
}

/// Routes mounted at `/api/v1/failed-bookings`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_failed_bookings))
        .route("/:id/resolve", patch(resolve_failed_booking))
}
