//! Booking endpoints.
//!
//! Travelers pay through hosted checkout sessions; the booking itself is
//! written when the provider's webhook arrives (see [`super::webhook`]).
//! Admins and lead guides manage bookings through the generic CRUD routes,
//! where manual bookings go through the same capacity check.

use super::crud::{self, Resource};
use super::refunds::request_refund;
use crate::aggregates::checkout::{CheckoutAction, CheckoutTarget};
use crate::auth::AuthUser;
use crate::error::{NatoursError, Result};
use crate::models::{Booking, User};
use crate::payment_gateway::CheckoutSession;
use crate::server::state::{AppState, WORKFLOW_TIMEOUT};
use crate::types::{BookingId, Money, Role, TourId, UserId};
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use natours_web::{ApiResponse, AppError};
use serde::Deserialize;
use uuid::Uuid;

const BOOKING_MANAGERS: &[Role] = &[Role::Admin, Role::LeadGuide];

// ============================================================================
// Checkout
// ============================================================================

/// Body of `POST /bookings/checkout-session`.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Tour to book
    pub tour_id: TourId,
    /// Departure
    pub start_date: DateTime<Utc>,
    /// Travelers to pay for
    pub num_participants: u32,
}

/// Body of `POST /bookings/:id/add-travelers`.
#[derive(Debug, Deserialize)]
pub struct AddTravelersRequest {
    /// Extra travelers
    pub num_participants: u32,
}

async fn start_checkout(
    state: &AppState,
    user: User,
    target: CheckoutTarget,
    num_participants: u32,
) -> std::result::Result<ApiResponse<CheckoutSession>, AppError> {
    let request_id = Uuid::new_v4();
    let action = CheckoutAction::StartCheckout {
        request_id,
        user,
        target,
        num_participants,
    };

    match state
        .checkout
        .send_and_wait_for(action, |a| a.ends_request(request_id), WORKFLOW_TIMEOUT)
        .await?
    {
        CheckoutAction::CheckoutSessionCreated { session, .. } => Ok(ApiResponse::ok(session)),
        CheckoutAction::CheckoutRejected { reason, .. } => Err(reason.into()),
        other => Err(AppError::internal("Unexpected checkout outcome")
            .with_source(anyhow::anyhow!("{other:?}"))),
    }
}

/// `POST /bookings/checkout-session`
///
/// Validates the departure and opens a hosted checkout session. The
/// response carries the session id and the URL to redirect to.
///
/// # Errors
///
/// 404 unknown tour, 400 bad date or traveler count, 409 not enough
/// places, 502 provider failure.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> std::result::Result<ApiResponse<CheckoutSession>, AppError> {
    let target = CheckoutTarget::NewBooking {
        tour_id: request.tour_id,
        start_date: request.start_date,
    };
    start_checkout(&state, auth.user, target, request.num_participants).await
}

/// `POST /bookings/:id/add-travelers`
///
/// # Errors
///
/// As for checkout sessions, plus 403 for someone else's booking.
pub async fn add_travelers(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(booking_id): Path<BookingId>,
    Json(request): Json<AddTravelersRequest>,
) -> std::result::Result<ApiResponse<CheckoutSession>, AppError> {
    let target = CheckoutTarget::AddTravelers { booking_id };
    start_checkout(&state, auth.user, target, request.num_participants).await
}

/// `GET /bookings/my-bookings`
///
/// # Errors
///
/// 401 without a session.
pub async fn my_bookings(
    State(state): State<AppState>,
    auth: AuthUser,
) -> std::result::Result<ApiResponse<Vec<Booking>>, AppError> {
    let bookings = state
        .repositories
        .bookings
        .list_for_user(auth.user.id)
        .await
        .map_err(NatoursError::from)?;
    Ok(ApiResponse::list(bookings))
}

// ============================================================================
// CRUD
// ============================================================================

const fn paid_by_default() -> bool {
    true
}

/// Body of `POST /bookings` (manual booking).
#[derive(Debug, Deserialize)]
pub struct CreateBooking {
    /// Booked tour
    pub tour: TourId,
    /// Traveler
    pub user: UserId,
    /// Departure
    pub start_date: DateTime<Utc>,
    /// Travelers
    pub num_participants: u32,
    /// Total price; defaults to the tour price for every traveler
    #[serde(default)]
    pub price: Option<Money>,
    /// Paid already
    #[serde(default = "paid_by_default")]
    pub paid: bool,
}

/// Body of `PATCH /bookings/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateBooking {
    /// Total price
    pub price: Option<Money>,
    /// Paid flag
    pub paid: Option<bool>,
}

#[async_trait]
impl Resource for Booking {
    type Id = BookingId;
    type Create = CreateBooking;
    type Update = UpdateBooking;

    const NAME: &'static str = "Booking";
    const FIELDS: &'static [&'static str] = &[
        "id",
        "tour",
        "user",
        "price",
        "start_date",
        "num_participants",
        "paid",
        "refunded",
        "created_at",
    ];
    const READ_ROLES: Option<&'static [Role]> = Some(BOOKING_MANAGERS);
    const CREATE_ROLES: &'static [Role] = BOOKING_MANAGERS;
    const WRITE_ROLES: &'static [Role] = BOOKING_MANAGERS;

    async fn list(state: &AppState) -> Result<Vec<Self>> {
        Ok(state.repositories.bookings.list().await?)
    }

    async fn find(state: &AppState, id: BookingId) -> Result<Option<Self>> {
        Ok(state.repositories.bookings.find(id).await?)
    }

    async fn create(state: &AppState, actor: &User, input: CreateBooking) -> Result<Self> {
        if input.num_participants == 0 {
            return Err(NatoursError::Validation("Please book at least one traveler".into()));
        }
        let tour = state
            .repositories
            .tours
            .find(input.tour)
            .await?
            .ok_or_else(|| NatoursError::not_found("Tour", input.tour))?;
        if state.repositories.users.find(input.user).await?.is_none() {
            return Err(NatoursError::not_found("User", input.user));
        }
        if tour.start_date(input.start_date).is_none() {
            return Err(NatoursError::BadRequest(
                "This tour does not run on the selected date".into(),
            ));
        }
        let price = input
            .price
            .unwrap_or_else(|| tour.effective_price().multiply(input.num_participants));
        if !price.is_positive() {
            return Err(NatoursError::Validation("A booking must have a price".into()));
        }

        let booking = Booking {
            id: BookingId::new(),
            tour: tour.id,
            user: input.user,
            price,
            start_date: input.start_date,
            num_participants: input.num_participants,
            payment_intents: Vec::new(),
            paid: input.paid,
            refunded: false,
            created_at: state.clock.now(),
        };
        state.repositories.bookings.create(&booking).await?;
        tracing::info!(
            booking_id = %booking.id,
            tour_id = %booking.tour,
            created_by = %actor.id,
            "Manual booking created"
        );
        Ok(booking)
    }

    async fn update(
        state: &AppState,
        _actor: &User,
        id: BookingId,
        input: UpdateBooking,
    ) -> Result<Option<Self>> {
        let Some(mut booking) = state.repositories.bookings.find(id).await? else {
            return Ok(None);
        };
        if let Some(price) = input.price {
            if !price.is_positive() {
                return Err(NatoursError::Validation("A booking must have a price".into()));
            }
            booking.price = price;
        }
        if let Some(paid) = input.paid {
            booking.paid = paid;
        }
        Ok(state
            .repositories
            .bookings
            .update(&booking)
            .await?
            .then_some(booking))
    }

    async fn delete(state: &AppState, _actor: &User, id: BookingId) -> Result<bool> {
        Ok(state.repositories.bookings.delete(id).await?)
    }
}

/// Routes mounted at `/api/v1/bookings`.
pub fn routes() -> Router<AppState> {
    crud::crud_routes::<Booking>()
        .route("/checkout-session", post(create_checkout_session))
        .route("/my-bookings", get(my_bookings))
        .route("/:id/add-travelers", post(add_travelers))
        .route("/:id/refund", post(request_refund))
}
