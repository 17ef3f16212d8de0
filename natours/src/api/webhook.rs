//! Stripe webhook endpoint.
//!
//! `POST /api/v1/webhook-checkout` receives the raw body so the signature is
//! checked over the exact bytes the provider signed. Completed checkouts are
//! reconciled by the checkout store; every other event type is acknowledged
//! and dropped.
//!
//! Reconciliation failures still answer 200: the failure is recorded as a
//! failed booking for an operator, and a provider retry would only hit the
//! same error.

use crate::aggregates::checkout::CheckoutAction;
use crate::payment_gateway::{WebhookError, WebhookEvent};
use crate::server::state::{AppState, WORKFLOW_TIMEOUT};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use natours_web::{AppError, CorrelationId};
use serde::Serialize;

/// Header carrying the provider signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Acknowledgement body
#[derive(Debug, Serialize)]
pub struct WebhookReceipt {
    /// Always `true`
    pub received: bool,
}

fn rejected(error: &WebhookError) -> AppError {
    metrics::counter!("natours.webhooks.rejected").increment(1);
    tracing::warn!(error = %error, "Webhook rejected");
    AppError::bad_request(format!("Webhook error: {error}"))
}

/// `POST /webhook-checkout`
///
/// # Errors
///
/// 400 for a missing or invalid signature or an unreadable body. A timeout
/// waiting for reconciliation is 408 and lets the provider retry.
pub async fn webhook_checkout(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookReceipt>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| rejected(&WebhookError::MissingHeader))?;

    let event = state
        .webhooks
        .construct_event(&body, signature, state.clock.now())
        .map_err(|e| rejected(&e))?;

    match event {
        WebhookEvent::Ignored(kind) => {
            tracing::debug!(event_type = %kind, "Webhook event ignored");
        }
        WebhookEvent::CheckoutCompleted(checkout) => {
            let session_id = checkout.session_id.clone();
            tracing::info!(
                session_id = %session_id,
                payment_intent = %checkout.payment_intent,
                "Checkout completed"
            );
            let outcome = state
                .checkout
                .send_and_wait_for(
                    CheckoutAction::FinalizeCheckout { checkout },
                    |a| a.ends_finalization(&session_id),
                    WORKFLOW_TIMEOUT,
                )
                .await?;
            if let CheckoutAction::FailedBookingRecorded {
                failed_booking_id, ..
            } = outcome
            {
                tracing::error!(
                    session_id = %session_id,
                    failed_booking_id = ?failed_booking_id,
                    correlation_id = %correlation_id,
                    "Paid checkout could not be booked"
                );
            }
        }
    }

    Ok(Json(WebhookReceipt { received: true }))
}
