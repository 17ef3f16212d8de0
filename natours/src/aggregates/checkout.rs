//! Checkout and booking reconciliation.
//!
//! Two workflows share this reducer:
//!
//! 1. **Session creation.** `StartCheckout` loads the tour (and the booking
//!    when travelers are added), validates the departure and its remaining
//!    capacity, then opens a hosted checkout session whose metadata carries
//!    the booking intent. The request ends in `CheckoutSessionCreated` or
//!    `CheckoutRejected`.
//! 2. **Finalization.** `FinalizeCheckout` (from the provider webhook) runs
//!    the reconciliation transaction. It ends in `BookingFinalized`, or in
//!    `FailedBookingRecorded` after the failure has been written down for an
//!    operator. Nothing is retried.
//!
//! The capacity check at session creation is advisory; the transaction
//! re-validates it under a row lock.

use crate::email::EmailProvider;
use crate::models::{Booking, FailedBooking, Tour, User};
use crate::payment_gateway::{
    CheckoutMetadata, CheckoutSession, CheckoutSessionRequest, CompletedCheckout, LineItem,
    PaymentGateway,
};
use crate::repositories::{
    BookingRepository, FailedBookingRepository, FinalizeOutcome, TourRepository, UserRepository,
};
use crate::types::{BookingId, FailedBookingId, TourId};
use chrono::{DateTime, Utc};
use natours_core::{effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Actions
// ============================================================================

/// What the traveler wants to pay for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckoutTarget {
    /// A new booking on a departure
    NewBooking {
        /// Tour to book
        tour_id: TourId,
        /// Departure
        start_date: DateTime<Utc>,
    },
    /// More travelers on an existing booking
    AddTravelers {
        /// Booking to extend
        booking_id: BookingId,
    },
}

/// Why a checkout session was not opened.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutRejection {
    /// Unknown or hidden tour
    #[error("No tour found with that ID")]
    TourNotFound,
    /// Unknown booking
    #[error("No booking found with that ID")]
    BookingNotFound,
    /// Booking belongs to someone else
    #[error("You can only add travelers to your own bookings")]
    NotBookingOwner,
    /// Booking was refunded
    #[error("This booking has been refunded")]
    BookingRefunded,
    /// The tour does not run on that date
    #[error("This tour does not run on the selected date")]
    StartDateNotFound,
    /// The departure has already left
    #[error("This tour has already started")]
    StartDateInPast,
    /// Fewer than one traveler
    #[error("Please book at least one traveler")]
    InvalidParticipants,
    /// Not enough places left
    #[error("Only {available} places left on this date, {requested} requested")]
    InsufficientCapacity {
        /// Travelers requested
        requested: u32,
        /// Places still free
        available: u32,
    },
    /// Provider refused to open the session
    #[error("Payment provider error: {0}")]
    Payment(String),
    /// Persistence failure while loading
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutRejection {
    /// Label used in metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::TourNotFound => "tour_not_found",
            Self::BookingNotFound => "booking_not_found",
            Self::NotBookingOwner => "not_booking_owner",
            Self::BookingRefunded => "booking_refunded",
            Self::StartDateNotFound => "start_date_not_found",
            Self::StartDateInPast => "start_date_in_past",
            Self::InvalidParticipants => "invalid_participants",
            Self::InsufficientCapacity { .. } => "insufficient_capacity",
            Self::Payment(_) => "payment",
            Self::Internal(_) => "internal",
        }
    }
}

/// Actions for the checkout reducer
#[derive(Clone, Debug)]
pub enum CheckoutAction {
    // Commands
    /// Open a checkout session
    StartCheckout {
        /// Correlates the terminal action with the waiting request
        request_id: Uuid,
        /// Paying user
        user: User,
        /// What is being bought
        target: CheckoutTarget,
        /// Travelers to pay for
        num_participants: u32,
    },

    /// Reconcile a completed checkout
    FinalizeCheckout {
        /// Verified provider event
        checkout: CompletedCheckout,
    },

    // Events
    /// Tour (and booking) loaded for a pending checkout
    CheckoutContextLoaded {
        /// Request ID
        request_id: Uuid,
        /// Tour being booked
        tour: Box<Tour>,
        /// Booking being extended
        booking: Option<Box<Booking>>,
    },

    /// Checkout session opened
    CheckoutSessionCreated {
        /// Request ID
        request_id: Uuid,
        /// Redirect handle
        session: CheckoutSession,
    },

    /// Checkout refused
    CheckoutRejected {
        /// Request ID
        request_id: Uuid,
        /// Reason
        reason: CheckoutRejection,
    },

    /// Reconciliation committed (or was already done)
    BookingFinalized {
        /// Provider session ID
        session_id: String,
        /// What happened
        outcome: FinalizeOutcome,
        /// Booking after the transaction
        booking: Box<Booking>,
    },

    /// Reconciliation rolled back
    FinalizationFailed {
        /// The checkout that could not be recorded
        checkout: CompletedCheckout,
        /// Error message
        error: String,
    },

    /// Failure written for an operator
    FailedBookingRecorded {
        /// Provider session ID
        session_id: String,
        /// Record ID, `None` if writing the record failed too
        failed_booking_id: Option<FailedBookingId>,
    },
}

impl CheckoutAction {
    /// Whether this action ends the session-creation request `id`.
    #[must_use]
    pub fn ends_request(&self, id: Uuid) -> bool {
        matches!(
            self,
            Self::CheckoutSessionCreated { request_id, .. }
            | Self::CheckoutRejected { request_id, .. } if *request_id == id
        )
    }

    /// Whether this action ends the finalization of session `id`.
    #[must_use]
    pub fn ends_finalization(&self, id: &str) -> bool {
        matches!(
            self,
            Self::BookingFinalized { session_id, .. }
            | Self::FailedBookingRecorded { session_id, .. } if session_id == id
        )
    }
}

// ============================================================================
// State
// ============================================================================

/// A session creation waiting on its tour and the provider.
#[derive(Clone, Debug)]
pub struct PendingCheckout {
    /// Paying user
    pub user: User,
    /// What is being bought
    pub target: CheckoutTarget,
    /// Travelers
    pub num_participants: u32,
}

/// Running totals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutStats {
    /// Sessions opened
    pub sessions_created: u64,
    /// Sessions refused
    pub rejected: u64,
    /// New bookings
    pub bookings_created: u64,
    /// Bookings extended
    pub travelers_added: u64,
    /// Redelivered webhooks
    pub already_recorded: u64,
    /// Reconciliation failures
    pub failures: u64,
}

/// In-flight checkout workflows.
#[derive(Clone, Debug, Default)]
pub struct CheckoutState {
    /// Session creations by request ID
    pub pending: HashMap<Uuid, PendingCheckout>,
    /// Sessions being finalized
    pub finalizing: HashSet<String>,
    /// Totals
    pub stats: CheckoutStats,
    /// Last error message
    pub last_error: Option<String>,
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the checkout reducer
#[derive(Clone)]
pub struct CheckoutEnvironment {
    /// Tours
    pub tours: Arc<dyn TourRepository>,
    /// Bookings
    pub bookings: Arc<dyn BookingRepository>,
    /// Failure records
    pub failed_bookings: Arc<dyn FailedBookingRepository>,
    /// Users (for confirmation emails)
    pub users: Arc<dyn UserRepository>,
    /// Hosted checkout provider
    pub gateway: Arc<dyn PaymentGateway>,
    /// Confirmation emails
    pub email: Arc<dyn EmailProvider>,
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Public site URL for redirects and images
    pub public_base_url: String,
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for checkout and booking reconciliation
#[derive(Clone, Debug, Default)]
pub struct CheckoutReducer;

impl CheckoutReducer {
    /// Creates a new `CheckoutReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validate a loaded checkout against the current schedule.
    fn validate(
        pending: &PendingCheckout,
        tour: &Tour,
        booking: Option<&Booking>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CheckoutRejection> {
        if pending.num_participants == 0 {
            return Err(CheckoutRejection::InvalidParticipants);
        }

        let start_date = match (&pending.target, booking) {
            (CheckoutTarget::AddTravelers { .. }, Some(booking)) => {
                if booking.user != pending.user.id {
                    return Err(CheckoutRejection::NotBookingOwner);
                }
                if booking.refunded {
                    return Err(CheckoutRejection::BookingRefunded);
                }
                booking.start_date
            },
            (CheckoutTarget::AddTravelers { .. }, None) => {
                return Err(CheckoutRejection::BookingNotFound);
            },
            (CheckoutTarget::NewBooking { start_date, .. }, _) => *start_date,
        };

        let departure = tour
            .start_date(start_date)
            .ok_or(CheckoutRejection::StartDateNotFound)?;
        if departure.date <= now {
            return Err(CheckoutRejection::StartDateInPast);
        }
        if !departure.can_accommodate(tour.max_group_size, pending.num_participants) {
            return Err(CheckoutRejection::InsufficientCapacity {
                requested: pending.num_participants,
                available: departure.available_places(tour.max_group_size),
            });
        }

        Ok(start_date)
    }

    fn session_request(
        env: &CheckoutEnvironment,
        pending: &PendingCheckout,
        tour: &Tour,
        booking: Option<&Booking>,
        start_date: DateTime<Utc>,
    ) -> CheckoutSessionRequest {
        let base = &env.public_base_url;
        CheckoutSessionRequest {
            customer_email: pending.user.email.clone(),
            client_reference_id: tour.id.to_string(),
            success_url: format!("{base}/my-tours?alert=booking"),
            cancel_url: format!("{base}/tour/{}", tour.slug),
            line_item: LineItem {
                name: format!("{} Tour", tour.name),
                description: tour.summary.clone(),
                images: vec![format!("{base}/img/tours/{}", tour.image_cover)],
                unit_amount: tour.effective_price(),
                quantity: pending.num_participants,
            },
            metadata: CheckoutMetadata {
                tour: tour.id,
                user: pending.user.id,
                start_date,
                num_participants: pending.num_participants,
                booking: booking.map(|b| b.id),
            },
        }
    }

    fn reject(request_id: Uuid, reason: CheckoutRejection) -> SmallVec<[Effect<CheckoutAction>; 4]> {
        smallvec![Effect::send(CheckoutAction::CheckoutRejected { request_id, reason })]
    }
}

impl Reducer for CheckoutReducer {
    type State = CheckoutState;
    type Action = CheckoutAction;
    type Environment = CheckoutEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Session creation ==========
            CheckoutAction::StartCheckout {
                request_id,
                user,
                target,
                num_participants,
            } => {
                if num_participants == 0 {
                    return Self::reject(request_id, CheckoutRejection::InvalidParticipants);
                }

                state.pending.insert(
                    request_id,
                    PendingCheckout {
                        user,
                        target: target.clone(),
                        num_participants,
                    },
                );

                let tours = Arc::clone(&env.tours);
                let bookings = Arc::clone(&env.bookings);
                smallvec![Effect::future(async move {
                    let rejected = |reason| CheckoutAction::CheckoutRejected { request_id, reason };

                    let (tour_id, booking) = match target {
                        CheckoutTarget::NewBooking { tour_id, .. } => (tour_id, None),
                        CheckoutTarget::AddTravelers { booking_id } => {
                            match bookings.find(booking_id).await {
                                Ok(Some(booking)) => (booking.tour, Some(Box::new(booking))),
                                Ok(None) => return Some(rejected(CheckoutRejection::BookingNotFound)),
                                Err(e) => return Some(rejected(CheckoutRejection::Internal(e.to_string()))),
                            }
                        },
                    };

                    Some(match tours.find(tour_id).await {
                        Ok(Some(tour)) => CheckoutAction::CheckoutContextLoaded {
                            request_id,
                            tour: Box::new(tour),
                            booking,
                        },
                        Ok(None) => rejected(CheckoutRejection::TourNotFound),
                        Err(e) => rejected(CheckoutRejection::Internal(e.to_string())),
                    })
                })]
            },

            CheckoutAction::CheckoutContextLoaded {
                request_id,
                tour,
                booking,
            } => {
                let Some(pending) = state.pending.get(&request_id) else {
                    return SmallVec::new();
                };

                let start_date = match Self::validate(pending, &tour, booking.as_deref(), env.clock.now()) {
                    Ok(start_date) => start_date,
                    Err(reason) => return Self::reject(request_id, reason),
                };

                let request = Self::session_request(env, pending, &tour, booking.as_deref(), start_date);
                let gateway = Arc::clone(&env.gateway);
                smallvec![Effect::future(async move {
                    Some(match gateway.create_checkout_session(request).await {
                        Ok(session) => CheckoutAction::CheckoutSessionCreated { request_id, session },
                        Err(e) => CheckoutAction::CheckoutRejected {
                            request_id,
                            reason: CheckoutRejection::Payment(e.to_string()),
                        },
                    })
                })]
            },

            CheckoutAction::CheckoutSessionCreated { request_id, session } => {
                state.pending.remove(&request_id);
                state.stats.sessions_created += 1;
                state.last_error = None;
                metrics::counter!("natours.checkout.sessions_created").increment(1);
                tracing::info!(%request_id, session_id = %session.id, "Checkout session created");
                SmallVec::new()
            },

            CheckoutAction::CheckoutRejected { request_id, reason } => {
                state.pending.remove(&request_id);
                state.stats.rejected += 1;
                state.last_error = Some(reason.to_string());
                metrics::counter!("natours.checkout.rejected", "reason" => reason.label()).increment(1);
                tracing::info!(%request_id, reason = %reason, "Checkout rejected");
                SmallVec::new()
            },

            // ========== Finalization ==========
            CheckoutAction::FinalizeCheckout { checkout } => {
                state.finalizing.insert(checkout.session_id.clone());

                let bookings = Arc::clone(&env.bookings);
                let now = env.clock.now();
                smallvec![Effect::future(async move {
                    Some(match bookings.finalize_checkout(&checkout, now).await {
                        Ok(finalized) => CheckoutAction::BookingFinalized {
                            session_id: checkout.session_id,
                            outcome: finalized.outcome,
                            booking: Box::new(finalized.booking),
                        },
                        Err(e) => CheckoutAction::FinalizationFailed {
                            error: e.to_string(),
                            checkout,
                        },
                    })
                })]
            },

            CheckoutAction::BookingFinalized {
                session_id,
                outcome,
                booking,
            } => {
                state.finalizing.remove(&session_id);
                match outcome {
                    FinalizeOutcome::Created => state.stats.bookings_created += 1,
                    FinalizeOutcome::TravelersAdded => state.stats.travelers_added += 1,
                    FinalizeOutcome::AlreadyRecorded => state.stats.already_recorded += 1,
                }
                metrics::counter!("natours.bookings.finalized", "outcome" => outcome.as_str()).increment(1);
                tracing::info!(
                    session_id = %session_id,
                    booking_id = %booking.id,
                    tour_id = %booking.tour,
                    outcome = outcome.as_str(),
                    "Checkout reconciled"
                );

                if outcome == FinalizeOutcome::AlreadyRecorded {
                    return SmallVec::new();
                }

                let users = Arc::clone(&env.users);
                let tours = Arc::clone(&env.tours);
                let email = Arc::clone(&env.email);
                smallvec![Effect::future(async move {
                    let user = users.find(booking.user).await.ok().flatten()?;
                    let tour_name = tours
                        .find(booking.tour)
                        .await
                        .ok()
                        .flatten()
                        .map_or_else(|| "your tour".to_string(), |t| t.name);
                    if let Err(e) = email
                        .send_booking_confirmation(&user.email, &tour_name, &booking)
                        .await
                    {
                        tracing::warn!(booking_id = %booking.id, error = %e, "Booking confirmation email failed");
                    }
                    None
                })]
            },

            CheckoutAction::FinalizationFailed { checkout, error } => {
                state.stats.failures += 1;
                state.last_error = Some(error.clone());
                metrics::counter!("natours.bookings.failed").increment(1);
                tracing::error!(
                    session_id = %checkout.session_id,
                    payment_intent = %checkout.payment_intent,
                    error = %error,
                    "Booking reconciliation failed, recording for manual remediation"
                );

                let failed = FailedBooking {
                    id: FailedBookingId::new(),
                    session_id: checkout.session_id.clone(),
                    tour: checkout.metadata.tour,
                    user: checkout.metadata.user,
                    start_date: checkout.metadata.start_date,
                    num_participants: checkout.metadata.num_participants,
                    amount: checkout.amount_total,
                    payment_intent: checkout.payment_intent,
                    error,
                    resolved: false,
                    created_at: env.clock.now(),
                    resolved_at: None,
                };
                let failed_bookings = Arc::clone(&env.failed_bookings);
                smallvec![Effect::future(async move {
                    let failed_booking_id = match failed_bookings.record(&failed).await {
                        Ok(()) => Some(failed.id),
                        Err(e) => {
                            tracing::error!(session_id = %failed.session_id, error = %e, "Could not record failed booking");
                            None
                        },
                    };
                    Some(CheckoutAction::FailedBookingRecorded {
                        session_id: failed.session_id,
                        failed_booking_id,
                    })
                })]
            },

            CheckoutAction::FailedBookingRecorded { session_id, .. } => {
                state.finalizing.remove(&session_id);
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::fixtures::{sample_tour, sample_user};
    use crate::mocks::{InMemoryDatabase, MockPaymentGateway, RecordingEmailProvider};
    use crate::repositories::{FailedBookingRepository, TourRepository, UserRepository};
    use crate::types::Money;
    use natours_testing::{assertions, effects, test_clock, ReducerTest};

    struct Harness {
        db: InMemoryDatabase,
        gateway: MockPaymentGateway,
        email: RecordingEmailProvider,
        env: CheckoutEnvironment,
    }

    fn harness() -> Harness {
        let db = InMemoryDatabase::new();
        let gateway = MockPaymentGateway::new();
        let email = RecordingEmailProvider::new();
        let repos = db.repositories();
        let env = CheckoutEnvironment {
            tours: repos.tours,
            bookings: repos.bookings,
            failed_bookings: repos.failed_bookings,
            users: repos.users,
            gateway: Arc::new(gateway.clone()),
            email: Arc::new(email.clone()),
            clock: Arc::new(test_clock()),
            public_base_url: "https://natours.test".into(),
        };
        Harness { db, gateway, email, env }
    }

    fn pending(user: User, tour: &Tour, travelers: u32) -> PendingCheckout {
        PendingCheckout {
            user,
            target: CheckoutTarget::NewBooking {
                tour_id: tour.id,
                start_date: tour.start_dates[0].date,
            },
            num_participants: travelers,
        }
    }

    #[test]
    fn test_validate_rejects_past_departure() {
        let tour = sample_tour("The Forest Hiker", 10);
        let pending = pending(sample_user("a@example.com"), &tour, 1);
        let after_departure = tour.start_dates[0].date + chrono::Duration::days(1);
        assert_eq!(
            CheckoutReducer::validate(&pending, &tour, None, after_departure),
            Err(CheckoutRejection::StartDateInPast)
        );
    }

    #[test]
    fn test_validate_rejects_unknown_date_and_capacity() {
        let mut tour = sample_tour("The Forest Hiker", 3);
        tour.start_dates[0].participants_booked = 2;
        let now = Utc::now();

        let too_many = pending(sample_user("a@example.com"), &tour, 2);
        assert_eq!(
            CheckoutReducer::validate(&too_many, &tour, None, now),
            Err(CheckoutRejection::InsufficientCapacity {
                requested: 2,
                available: 1
            })
        );

        let mut wrong_date = pending(sample_user("a@example.com"), &tour, 1);
        wrong_date.target = CheckoutTarget::NewBooking {
            tour_id: tour.id,
            start_date: now + chrono::Duration::days(7),
        };
        assert_eq!(
            CheckoutReducer::validate(&wrong_date, &tour, None, now),
            Err(CheckoutRejection::StartDateNotFound)
        );
    }

    #[test]
    fn test_validate_add_travelers_checks_owner() {
        let tour = sample_tour("The Forest Hiker", 10);
        let owner = sample_user("owner@example.com");
        let booking = Booking {
            id: BookingId::new(),
            tour: tour.id,
            user: owner.id,
            price: Money::from_dollars(397),
            start_date: tour.start_dates[0].date,
            num_participants: 1,
            payment_intents: vec![],
            paid: true,
            refunded: false,
            created_at: Utc::now(),
        };
        let intruder = PendingCheckout {
            user: sample_user("intruder@example.com"),
            target: CheckoutTarget::AddTravelers {
                booking_id: booking.id,
            },
            num_participants: 1,
        };
        assert_eq!(
            CheckoutReducer::validate(&intruder, &tour, Some(&booking), Utc::now()),
            Err(CheckoutRejection::NotBookingOwner)
        );

        let owner_request = PendingCheckout {
            user: owner,
            ..intruder
        };
        assert_eq!(
            CheckoutReducer::validate(&owner_request, &tour, Some(&booking), Utc::now()),
            Ok(booking.start_date)
        );
    }

    #[test]
    fn test_zero_participants_rejected_without_loading() {
        let h = harness();
        let request_id = Uuid::new_v4();
        ReducerTest::new(CheckoutReducer::new())
            .with_env(h.env)
            .given_state(CheckoutState::default())
            .when_action(CheckoutAction::StartCheckout {
                request_id,
                user: sample_user("a@example.com"),
                target: CheckoutTarget::NewBooking {
                    tour_id: TourId::new(),
                    start_date: Utc::now(),
                },
                num_participants: 0,
            })
            .then_state(|state| assert!(state.pending.is_empty()))
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[tokio::test]
    async fn test_start_checkout_opens_session_with_metadata() {
        let h = harness();
        let tour = sample_tour("The Forest Hiker", 10);
        TourRepository::insert(&h.db, &tour).await.unwrap();
        let user = sample_user("jonas@example.com");
        let reducer = CheckoutReducer::new();
        let mut state = CheckoutState::default();
        let request_id = Uuid::new_v4();

        let loaded = effects::resolve(reducer.reduce(
            &mut state,
            CheckoutAction::StartCheckout {
                request_id,
                user: user.clone(),
                target: CheckoutTarget::NewBooking {
                    tour_id: tour.id,
                    start_date: tour.start_dates[0].date,
                },
                num_participants: 2,
            },
            &h.env,
        ))
        .await;
        assert!(matches!(loaded[0], CheckoutAction::CheckoutContextLoaded { .. }));

        let created = effects::resolve(reducer.reduce(&mut state, loaded[0].clone(), &h.env)).await;
        let CheckoutAction::CheckoutSessionCreated { session, .. } = &created[0] else {
            panic!("expected session, got {created:?}");
        };
        assert!(session.url.contains(&session.id));

        let requests = h.gateway.checkout_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].line_item.unit_amount, Money::from_dollars(397));
        assert_eq!(requests[0].line_item.quantity, 2);
        assert_eq!(requests[0].metadata.user, user.id);
        assert_eq!(requests[0].customer_email, "jonas@example.com");

        reducer.reduce(&mut state, created[0].clone(), &h.env);
        assert!(state.pending.is_empty());
        assert_eq!(state.stats.sessions_created, 1);
    }

    #[tokio::test]
    async fn test_unknown_tour_is_rejected() {
        let h = harness();
        let mut state = CheckoutState::default();
        let request_id = Uuid::new_v4();
        let actions = effects::resolve(CheckoutReducer::new().reduce(
            &mut state,
            CheckoutAction::StartCheckout {
                request_id,
                user: sample_user("a@example.com"),
                target: CheckoutTarget::NewBooking {
                    tour_id: TourId::new(),
                    start_date: Utc::now(),
                },
                num_participants: 1,
            },
            &h.env,
        ))
        .await;
        assert!(actions[0].ends_request(request_id));
        assert!(matches!(
            actions[0],
            CheckoutAction::CheckoutRejected {
                reason: CheckoutRejection::TourNotFound,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_finalize_creates_booking_and_sends_confirmation() {
        let h = harness();
        let tour = sample_tour("The Forest Hiker", 10);
        TourRepository::insert(&h.db, &tour).await.unwrap();
        let user = sample_user("jonas@example.com");
        UserRepository::insert(&h.db, &user).await.unwrap();

        let checkout = CompletedCheckout {
            session_id: "cs_1".into(),
            payment_intent: "pi_1".into(),
            amount_total: Money::from_dollars(794),
            customer_email: Some(user.email.clone()),
            metadata: CheckoutMetadata {
                tour: tour.id,
                user: user.id,
                start_date: tour.start_dates[0].date,
                num_participants: 2,
                booking: None,
            },
        };

        let reducer = CheckoutReducer::new();
        let mut state = CheckoutState::default();
        let finalized = effects::resolve(reducer.reduce(
            &mut state,
            CheckoutAction::FinalizeCheckout { checkout },
            &h.env,
        ))
        .await;
        assert!(finalized[0].ends_finalization("cs_1"));

        let follow_up = effects::resolve(reducer.reduce(&mut state, finalized[0].clone(), &h.env)).await;
        assert!(follow_up.is_empty());
        assert_eq!(state.stats.bookings_created, 1);
        assert!(state.finalizing.is_empty());

        let sent = h.email.sent_to("jonas@example.com");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("The Forest Hiker"));
    }

    #[tokio::test]
    async fn test_failed_finalization_is_recorded() {
        let h = harness();
        let tour = sample_tour("The Forest Hiker", 1);
        TourRepository::insert(&h.db, &tour).await.unwrap();

        let checkout = CompletedCheckout {
            session_id: "cs_full".into(),
            payment_intent: "pi_full".into(),
            amount_total: Money::from_dollars(794),
            customer_email: None,
            metadata: CheckoutMetadata {
                tour: tour.id,
                user: sample_user("late@example.com").id,
                start_date: tour.start_dates[0].date,
                num_participants: 2,
                booking: None,
            },
        };

        let reducer = CheckoutReducer::new();
        let mut state = CheckoutState::default();
        let failed = effects::resolve(reducer.reduce(
            &mut state,
            CheckoutAction::FinalizeCheckout { checkout },
            &h.env,
        ))
        .await;
        assert!(matches!(failed[0], CheckoutAction::FinalizationFailed { .. }));
        assert!(!failed[0].ends_finalization("cs_full"));

        let recorded = effects::resolve(reducer.reduce(&mut state, failed[0].clone(), &h.env)).await;
        assert!(recorded[0].ends_finalization("cs_full"));
        reducer.reduce(&mut state, recorded[0].clone(), &h.env);

        let records = FailedBookingRepository::list(&h.db).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payment_intent, "pi_full");
        assert!(records[0].error.contains("places left"));
        assert_eq!(state.stats.failures, 1);
        assert!(state.finalizing.is_empty());
        assert_eq!(h.db.booking_count(), 0);
    }
}
