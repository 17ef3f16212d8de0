//! Application errors and their HTTP mapping.

use crate::aggregates::checkout::CheckoutRejection;
use crate::aggregates::refund::RefundDenial;
use crate::email::EmailError;
use crate::payment_gateway::PaymentGatewayError;
use crate::repositories::RepositoryError;
use natours_web::AppError;

/// Result type for application operations
pub type Result<T> = std::result::Result<T, NatoursError>;

/// Errors raised by handlers and services.
#[derive(Debug, thiserror::Error)]
pub enum NatoursError {
    /// Resource does not exist (or is hidden)
    #[error("{resource} with id {id} not found")]
    NotFound {
        /// Resource kind
        resource: &'static str,
        /// Requested ID
        id: String,
    },

    /// Input failed validation
    #[error("{0}")]
    Validation(String),

    /// Request conflicts with existing data
    #[error("{0}")]
    Conflict(String),

    /// Caller is not authenticated
    #[error("{0}")]
    Unauthorized(String),

    /// Caller is not allowed to do this
    #[error("{0}")]
    Forbidden(String),

    /// Request is malformed
    #[error("{0}")]
    BadRequest(String),

    /// Payment provider failure
    #[error(transparent)]
    Payment(#[from] PaymentGatewayError),

    /// Persistence failure
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Email delivery failure
    #[error(transparent)]
    Email(#[from] EmailError),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

impl NatoursError {
    /// Shorthand for [`NatoursError::NotFound`]
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { resource } => Self::new(
                axum::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{resource} not found"),
            ),
            RepositoryError::Conflict(message) => Self::conflict(message),
            err @ RepositoryError::CapacityExceeded { .. } => Self::conflict(err.to_string()),
            RepositoryError::InvalidState(message) => Self::bad_request(message),
            err @ (RepositoryError::Database(_) | RepositoryError::Corrupt(_)) => {
                Self::internal("An internal error occurred").with_source(err.into())
            },
        }
    }
}

impl From<NatoursError> for AppError {
    fn from(err: NatoursError) -> Self {
        match err {
            NatoursError::NotFound { resource, id } => Self::not_found(resource, id),
            NatoursError::Validation(message) => Self::validation(message),
            NatoursError::Conflict(message) => Self::conflict(message),
            NatoursError::Unauthorized(message) => Self::unauthorized(message),
            NatoursError::Forbidden(message) => Self::forbidden(message),
            NatoursError::BadRequest(message) => Self::bad_request(message),
            NatoursError::Payment(err) => {
                Self::bad_gateway("Payment provider request failed").with_source(err.into())
            },
            NatoursError::Repository(err) => err.into(),
            NatoursError::Email(err) => {
                Self::internal("There was an error sending the email. Try again later!")
                    .with_source(err.into())
            },
            NatoursError::Internal(message) => {
                Self::internal("An internal error occurred").with_source(anyhow::anyhow!(message))
            },
        }
    }
}

impl From<CheckoutRejection> for AppError {
    fn from(reason: CheckoutRejection) -> Self {
        let message = reason.to_string();
        match reason {
            CheckoutRejection::TourNotFound | CheckoutRejection::BookingNotFound => Self::new(
                axum::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                message,
            ),
            CheckoutRejection::NotBookingOwner => Self::forbidden(message),
            CheckoutRejection::BookingRefunded
            | CheckoutRejection::StartDateNotFound
            | CheckoutRejection::StartDateInPast
            | CheckoutRejection::InvalidParticipants => Self::bad_request(message),
            CheckoutRejection::InsufficientCapacity { .. } => Self::conflict(message),
            CheckoutRejection::Payment(_) => Self::bad_gateway(message),
            CheckoutRejection::Internal(detail) => {
                Self::internal("An internal error occurred").with_source(anyhow::anyhow!(detail))
            },
        }
    }
}

impl From<RefundDenial> for AppError {
    fn from(reason: RefundDenial) -> Self {
        let message = reason.to_string();
        match reason {
            RefundDenial::BookingNotFound | RefundDenial::RefundNotFound => Self::new(
                axum::http::StatusCode::NOT_FOUND,
                "NOT_FOUND",
                message,
            ),
            RefundDenial::NotBookingOwner => Self::forbidden(message),
            RefundDenial::NotPaid
            | RefundDenial::AlreadyRefunded
            | RefundDenial::TourAlreadyStarted
            | RefundDenial::NotPending(_) => Self::bad_request(message),
            RefundDenial::AlreadyRequested => Self::conflict(message),
            RefundDenial::Internal(detail) => {
                Self::internal("An internal error occurred").with_source(anyhow::anyhow!(detail))
            },
        }
    }
}
