//! Refund endpoints.
//!
//! - POST /api/v1/bookings/:id/refund - traveler asks for a refund
//! - GET /api/v1/refunds/my-refunds
//! - admin: GET /refunds, GET /refunds/:id
//! - admin: PATCH /refunds/:id/process, PATCH /refunds/:id/reject

use crate::aggregates::refund::RefundAction;
use crate::auth::{AuthUser, RequireAdmin};
use crate::error::NatoursError;
use crate::models::Refund;
use crate::server::state::{AppState, WORKFLOW_TIMEOUT};
use crate::types::{BookingId, RefundId};
use axum::{
    extract::{Path, State},
    routing::{get, patch},
    Router,
};
use natours_web::{ApiResponse, AppError};
use uuid::Uuid;

async fn run(state: &AppState, request_id: Uuid, action: RefundAction) -> Result<RefundAction, AppError> {
    Ok(state
        .refunds
        .send_and_wait_for(action, |a| a.ends_request(request_id), WORKFLOW_TIMEOUT)
        .await?)
}

fn unexpected(action: &RefundAction) -> AppError {
    AppError::internal("Unexpected refund outcome").with_source(anyhow::anyhow!("{action:?}"))
}

/// `POST /bookings/:id/refund`
///
/// # Errors
///
/// 404 unknown booking, 403 someone else's booking, 400 unpaid, refunded or
/// started, 409 already requested.
pub async fn request_refund(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<BookingId>,
) -> Result<ApiResponse<Refund>, AppError> {
    let request_id = Uuid::new_v4();
    let action = RefundAction::RequestRefund {
        request_id,
        user: auth.user,
        booking_id,
    };
    match run(&state, request_id, action).await? {
        RefundAction::RefundRequested { refund, .. } => Ok(ApiResponse::created(refund)),
        RefundAction::RefundDenied { reason, .. } => Err(reason.into()),
        other => Err(unexpected(&other)),
    }
}

/// `PATCH /refunds/:id/process`: return the money and release the places.
///
/// # Errors
///
/// 404 unknown refund, 400 already decided, 502 when the provider refuses
/// (the refund stays pending).
pub async fn process_refund(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(refund_id): Path<RefundId>,
) -> Result<ApiResponse<Refund>, AppError> {
    let request_id = Uuid::new_v4();
    let action = RefundAction::ProcessRefund {
        request_id,
        refund_id,
    };
    match run(&state, request_id, action).await? {
        RefundAction::RefundProcessed { refund, .. } => Ok(ApiResponse::ok(refund)),
        RefundAction::RefundFailed { error, .. } => Err(AppError::bad_gateway(format!(
            "Refund could not be processed and is still pending: {error}"
        ))),
        RefundAction::RefundDenied { reason, .. } => Err(reason.into()),
        other => Err(unexpected(&other)),
    }
}

/// `PATCH /refunds/:id/reject`
///
/// # Errors
///
/// 404 unknown refund, 400 already decided.
pub async fn reject_refund(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(refund_id): Path<RefundId>,
) -> Result<ApiResponse<Refund>, AppError> {
    let request_id = Uuid::new_v4();
    let action = RefundAction::RejectRefund {
        request_id,
        refund_id,
    };
    match run(&state, request_id, action).await? {
        RefundAction::RefundRejected { refund, .. } => Ok(ApiResponse::ok(refund)),
        RefundAction::RefundDenied { reason, .. } => Err(reason.into()),
        other => Err(unexpected(&other)),
    }
}

/// `GET /refunds/my-refunds`
///
/// # Errors
///
/// 401 without a session.
pub async fn my_refunds(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<ApiResponse<Vec<Refund>>, AppError> {
    let refunds = state
        .repositories
        .refunds
        .list_for_user(auth.user.id)
        .await
        .map_err(NatoursError::from)?;
    Ok(ApiResponse::list(refunds))
}

/// `GET /refunds` (admin)
///
/// # Errors
///
/// 401/403 for non-admins.
pub async fn list_refunds(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> Result<ApiResponse<Vec<Refund>>, AppError> {
    let refunds = state.repositories.refunds.list().await.map_err(NatoursError::from)?;
    Ok(ApiResponse::list(refunds))
}

/// `GET /refunds/:id` (admin)
///
/// # Errors
///
/// 404 unknown refund.
pub async fn get_refund(
    State(state): State<AppState>,
    _admin: RequireAdmin,
    Path(refund_id): Path<RefundId>,
) -> Result<ApiResponse<Refund>, AppError> {
    let refund = state
        .repositories
        .refunds
        .find(refund_id)
        .await
        .map_err(NatoursError::from)?
        .ok_or_else(|| NatoursError::not_found("Refund", refund_id))?;
    Ok(ApiResponse::ok(refund))
}

/// Routes mounted at `/api/v1/refunds`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_refunds))
        .route("/my-refunds", get(my_refunds))
        .route("/:id", get(get_refund))
        .route("/:id/process", patch(process_refund))
        .route("/:id/reject", patch(reject_refund))
}
