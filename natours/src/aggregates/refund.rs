//! Refund requests and their review by an admin.
//!
//! A traveler may ask once per booking, before the tour starts. An admin
//! then either processes the refund (the provider returns every captured
//! payment intent, then the booking is released in one transaction) or
//! rejects it. Both outcomes are final.
//!
//! A provider failure leaves the refund pending and is reported to the
//! admin; nothing is retried.

use crate::email::EmailProvider;
use crate::models::{Booking, Refund, User};
use crate::payment_gateway::PaymentGateway;
use crate::repositories::{BookingRepository, RefundRepository, RepositoryError, UserRepository};
use crate::types::{BookingId, RefundId, RefundStatus};
use chrono::{DateTime, Utc};
use natours_core::{effect::Effect, environment::Clock, reducer::Reducer, smallvec, SmallVec};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Why a refund request or decision was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RefundDenial {
    /// Unknown booking
    #[error("No booking found with that ID")]
    BookingNotFound,
    /// Unknown refund
    #[error("No refund found with that ID")]
    RefundNotFound,
    /// Booking belongs to someone else
    #[error("You can only request refunds for your own bookings")]
    NotBookingOwner,
    /// Nothing was paid
    #[error("This booking has not been paid")]
    NotPaid,
    /// Booking already refunded
    #[error("This booking has already been refunded")]
    AlreadyRefunded,
    /// The tour has started
    #[error("Refunds are only possible before the tour starts")]
    TourAlreadyStarted,
    /// A refund exists for this booking
    #[error("A refund was already requested for this booking")]
    AlreadyRequested,
    /// Decision on a refund that is no longer pending
    #[error("Refund is already {0}")]
    NotPending(RefundStatus),
    /// Persistence failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Actions for the refund reducer
#[derive(Clone, Debug)]
pub enum RefundAction {
    // Commands
    /// A traveler asks for their money back
    RequestRefund {
        /// Correlates the terminal action with the waiting request
        request_id: Uuid,
        /// Requesting user
        user: User,
        /// Booking to refund
        booking_id: BookingId,
    },
    /// An admin approves a refund
    ProcessRefund {
        /// Request ID
        request_id: Uuid,
        /// Refund to process
        refund_id: RefundId,
    },
    /// An admin refuses a refund
    RejectRefund {
        /// Request ID
        request_id: Uuid,
        /// Refund to reject
        refund_id: RefundId,
    },

    // Events
    /// Booking and prior refund loaded for a request
    RefundContextLoaded {
        /// Request ID
        request_id: Uuid,
        /// Booking to refund
        booking: Box<Booking>,
        /// Refund already requested for it
        existing: Option<Refund>,
    },
    /// Refund and its booking loaded for a decision
    RefundLoaded {
        /// Request ID
        request_id: Uuid,
        /// Refund under review
        refund: Refund,
        /// Its booking
        booking: Option<Box<Booking>>,
    },
    /// Refund request stored as pending
    RefundRequested {
        /// Request ID
        request_id: Uuid,
        /// New refund
        refund: Refund,
    },
    /// Money returned and booking released
    RefundProcessed {
        /// Request ID
        request_id: Uuid,
        /// Refund after the transaction
        refund: Refund,
    },
    /// Refund rejected
    RefundRejected {
        /// Request ID
        request_id: Uuid,
        /// Refund after the update
        refund: Refund,
    },
    /// Provider or persistence failure while processing; refund stays pending
    RefundFailed {
        /// Request ID
        request_id: Uuid,
        /// Refund being processed
        refund_id: RefundId,
        /// Error message
        error: String,
    },
    /// Request or decision refused
    RefundDenied {
        /// Request ID
        request_id: Uuid,
        /// Reason
        reason: RefundDenial,
    },
}

impl RefundAction {
    /// Whether this action ends the request `id`.
    #[must_use]
    pub fn ends_request(&self, id: Uuid) -> bool {
        matches!(
            self,
            Self::RefundRequested { request_id, .. }
            | Self::RefundProcessed { request_id, .. }
            | Self::RefundRejected { request_id, .. }
            | Self::RefundFailed { request_id, .. }
            | Self::RefundDenied { request_id, .. } if *request_id == id
        )
    }
}

/// What a pending request will do once its data is loaded.
#[derive(Clone, Debug)]
pub enum PendingRefund {
    /// Traveler request
    Request {
        /// Requesting user
        user: User,
    },
    /// Admin approval
    Process,
    /// Admin rejection
    Reject,
}

/// Running totals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefundStats {
    /// Requests stored
    pub requested: u64,
    /// Refunds processed
    pub processed: u64,
    /// Refunds rejected
    pub rejected: u64,
    /// Processing failures
    pub failed: u64,
    /// Requests or decisions refused
    pub denied: u64,
}

/// In-flight refund workflows.
#[derive(Clone, Debug, Default)]
pub struct RefundState {
    /// Requests by ID
    pub pending: HashMap<Uuid, PendingRefund>,
    /// Totals
    pub stats: RefundStats,
    /// Last error message
    pub last_error: Option<String>,
}

/// Environment dependencies for the refund reducer
#[derive(Clone)]
pub struct RefundEnvironment {
    /// Bookings
    pub bookings: Arc<dyn BookingRepository>,
    /// Refunds
    pub refunds: Arc<dyn RefundRepository>,
    /// Users (for notifications)
    pub users: Arc<dyn UserRepository>,
    /// Provider refunds
    pub gateway: Arc<dyn PaymentGateway>,
    /// Notifications
    pub email: Arc<dyn EmailProvider>,
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
}

/// Reducer for refunds
#[derive(Clone, Debug, Default)]
pub struct RefundReducer;

impl RefundReducer {
    /// Creates a new `RefundReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Rules for a traveler's refund request.
    fn validate_request(
        user: &User,
        booking: &Booking,
        existing: Option<&Refund>,
        now: DateTime<Utc>,
    ) -> Result<(), RefundDenial> {
        if booking.user != user.id {
            return Err(RefundDenial::NotBookingOwner);
        }
        if !booking.paid {
            return Err(RefundDenial::NotPaid);
        }
        if booking.refunded {
            return Err(RefundDenial::AlreadyRefunded);
        }
        if booking.start_date <= now {
            return Err(RefundDenial::TourAlreadyStarted);
        }
        if existing.is_some() {
            return Err(RefundDenial::AlreadyRequested);
        }
        Ok(())
    }

    fn deny(request_id: Uuid, reason: RefundDenial) -> SmallVec<[Effect<RefundAction>; 4]> {
        smallvec![Effect::send(RefundAction::RefundDenied { request_id, reason })]
    }

    fn record_transition(status: RefundStatus) {
        metrics::counter!("natours.refunds.transitions", "status" => status.as_str()).increment(1);
    }

    fn notify(env: &RefundEnvironment, refund: Refund) -> Effect<RefundAction> {
        let users = Arc::clone(&env.users);
        let email = Arc::clone(&env.email);
        Effect::future(async move {
            let user = users.find(refund.user).await.ok().flatten()?;
            if let Err(e) = email.send_refund_update(&user.email, &refund).await {
                tracing::warn!(refund_id = %refund.id, error = %e, "Refund notification failed");
            }
            None
        })
    }

    /// Refund every captured payment intent, then commit the release.
    fn process(env: &RefundEnvironment, request_id: Uuid, refund: Refund, booking: Booking) -> Effect<RefundAction> {
        let gateway = Arc::clone(&env.gateway);
        let refunds = Arc::clone(&env.refunds);
        let clock = Arc::clone(&env.clock);
        Effect::future(async move {
            let mut provider_ids = Vec::with_capacity(booking.payment_intents.len());
            for intent in &booking.payment_intents {
                match gateway.refund(&intent.id, intent.amount).await {
                    Ok(id) => provider_ids.push(id),
                    Err(e) => {
                        if !provider_ids.is_empty() {
                            tracing::error!(
                                refund_id = %refund.id,
                                refunded = ?provider_ids,
                                failed_intent = %intent.id,
                                "Refund partially returned by provider"
                            );
                        }
                        return Some(RefundAction::RefundFailed {
                            request_id,
                            refund_id: refund.id,
                            error: e.to_string(),
                        });
                    },
                }
            }

            let provider_refund_id = if provider_ids.is_empty() {
                "manual".to_string()
            } else {
                provider_ids.join(",")
            };

            Some(match refunds.complete(refund.id, &provider_refund_id, clock.now()).await {
                Ok(refund) => RefundAction::RefundProcessed { request_id, refund },
                Err(e) => {
                    tracing::error!(
                        refund_id = %refund.id,
                        provider_refund_id = %provider_refund_id,
                        error = %e,
                        "Provider refunded but booking release failed"
                    );
                    RefundAction::RefundFailed {
                        request_id,
                        refund_id: refund.id,
                        error: e.to_string(),
                    }
                },
            })
        })
    }
}

impl Reducer for RefundReducer {
    type State = RefundState;
    type Action = RefundAction;
    type Environment = RefundEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Request ==========
            RefundAction::RequestRefund {
                request_id,
                user,
                booking_id,
            } => {
                state.pending.insert(request_id, PendingRefund::Request { user });

                let bookings = Arc::clone(&env.bookings);
                let refunds = Arc::clone(&env.refunds);
                smallvec![Effect::future(async move {
                    let denied = |reason| RefundAction::RefundDenied { request_id, reason };
                    let booking = match bookings.find(booking_id).await {
                        Ok(Some(booking)) => booking,
                        Ok(None) => return Some(denied(RefundDenial::BookingNotFound)),
                        Err(e) => return Some(denied(RefundDenial::Internal(e.to_string()))),
                    };
                    Some(match refunds.find_for_booking(booking_id).await {
                        Ok(existing) => RefundAction::RefundContextLoaded {
                            request_id,
                            booking: Box::new(booking),
                            existing,
                        },
                        Err(e) => denied(RefundDenial::Internal(e.to_string())),
                    })
                })]
            },

            RefundAction::RefundContextLoaded {
                request_id,
                booking,
                existing,
            } => {
                let Some(PendingRefund::Request { user }) = state.pending.get(&request_id) else {
                    return SmallVec::new();
                };
                let now = env.clock.now();
                if let Err(reason) = Self::validate_request(user, &booking, existing.as_ref(), now) {
                    return Self::deny(request_id, reason);
                }

                let refund = Refund::pending(&booking, now);
                let refunds = Arc::clone(&env.refunds);
                smallvec![Effect::future(async move {
                    Some(match refunds.insert(&refund).await {
                        Ok(()) => RefundAction::RefundRequested { request_id, refund },
                        Err(RepositoryError::Conflict(_)) => RefundAction::RefundDenied {
                            request_id,
                            reason: RefundDenial::AlreadyRequested,
                        },
                        Err(e) => RefundAction::RefundDenied {
                            request_id,
                            reason: RefundDenial::Internal(e.to_string()),
                        },
                    })
                })]
            },

            RefundAction::RefundRequested { request_id, refund } => {
                state.pending.remove(&request_id);
                state.stats.requested += 1;
                Self::record_transition(RefundStatus::Pending);
                tracing::info!(refund_id = %refund.id, booking_id = %refund.booking, "Refund requested");
                SmallVec::new()
            },

            // ========== Decisions ==========
            RefundAction::ProcessRefund { request_id, refund_id }
            | RefundAction::RejectRefund { request_id, refund_id } => {
                let (decision, needs_booking) = match action {
                    RefundAction::ProcessRefund { .. } => (PendingRefund::Process, true),
                    _ => (PendingRefund::Reject, false),
                };
                state.pending.insert(request_id, decision);

                let refunds = Arc::clone(&env.refunds);
                let bookings = Arc::clone(&env.bookings);
                smallvec![Effect::future(async move {
                    let denied = |reason| RefundAction::RefundDenied { request_id, reason };
                    let refund = match refunds.find(refund_id).await {
                        Ok(Some(refund)) => refund,
                        Ok(None) => return Some(denied(RefundDenial::RefundNotFound)),
                        Err(e) => return Some(denied(RefundDenial::Internal(e.to_string()))),
                    };
                    let booking = if needs_booking {
                        match bookings.find(refund.booking).await {
                            Ok(booking) => booking.map(Box::new),
                            Err(e) => return Some(denied(RefundDenial::Internal(e.to_string()))),
                        }
                    } else {
                        None
                    };
                    Some(RefundAction::RefundLoaded {
                        request_id,
                        refund,
                        booking,
                    })
                })]
            },

            RefundAction::RefundLoaded {
                request_id,
                refund,
                booking,
            } => {
                let Some(decision) = state.pending.get(&request_id) else {
                    return SmallVec::new();
                };
                if refund.status.is_terminal() {
                    return Self::deny(request_id, RefundDenial::NotPending(refund.status));
                }

                match decision {
                    PendingRefund::Process => match booking {
                        Some(booking) => smallvec![Self::process(env, request_id, refund, *booking)],
                        None => Self::deny(request_id, RefundDenial::BookingNotFound),
                    },
                    PendingRefund::Reject => {
                        let refunds = Arc::clone(&env.refunds);
                        let now = env.clock.now();
                        smallvec![Effect::future(async move {
                            Some(match refunds.reject(refund.id, now).await {
                                Ok(refund) => RefundAction::RefundRejected { request_id, refund },
                                Err(e) => RefundAction::RefundDenied {
                                    request_id,
                                    reason: RefundDenial::Internal(e.to_string()),
                                },
                            })
                        })]
                    },
                    PendingRefund::Request { .. } => SmallVec::new(),
                }
            },

            RefundAction::RefundProcessed { request_id, refund } => {
                state.pending.remove(&request_id);
                state.stats.processed += 1;
                state.last_error = None;
                Self::record_transition(RefundStatus::Processed);
                tracing::info!(
                    refund_id = %refund.id,
                    booking_id = %refund.booking,
                    amount = refund.amount.cents(),
                    "Refund processed"
                );
                smallvec![Self::notify(env, refund)]
            },

            RefundAction::RefundRejected { request_id, refund } => {
                state.pending.remove(&request_id);
                state.stats.rejected += 1;
                Self::record_transition(RefundStatus::Rejected);
                tracing::info!(refund_id = %refund.id, booking_id = %refund.booking, "Refund rejected");
                smallvec![Self::notify(env, refund)]
            },

            RefundAction::RefundFailed {
                request_id,
                refund_id,
                error,
            } => {
                state.pending.remove(&request_id);
                state.stats.failed += 1;
                tracing::warn!(refund_id = %refund_id, error = %error, "Refund processing failed, refund stays pending");
                state.last_error = Some(error);
                SmallVec::new()
            },

            RefundAction::RefundDenied { request_id, reason } => {
                state.pending.remove(&request_id);
                state.stats.denied += 1;
                state.last_error = Some(reason.to_string());
                tracing::debug!(%request_id, reason = %reason, "Refund denied");
                SmallVec::new()
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::fixtures::{departure_in, sample_tour, sample_user};
    use crate::mocks::{InMemoryDatabase, MockPaymentGateway, RecordingEmailProvider};
    use crate::models::PaymentIntent;
    use crate::payment_gateway::{CheckoutMetadata, CompletedCheckout};
    use crate::repositories::TourRepository;
    use crate::types::{Money, TourId};
    use natours_testing::{effects, test_clock, ReducerTest};

    fn booking_for(user: &User, start_date: DateTime<Utc>) -> Booking {
        Booking {
            id: BookingId::new(),
            tour: TourId::new(),
            user: user.id,
            price: Money::from_dollars(600),
            start_date,
            num_participants: 2,
            payment_intents: vec![
                PaymentIntent {
                    id: "pi_1".into(),
                    amount: Money::from_dollars(400),
                },
                PaymentIntent {
                    id: "pi_2".into(),
                    amount: Money::from_dollars(200),
                },
            ],
            paid: true,
            refunded: false,
            created_at: Utc::now(),
        }
    }

    fn env(db: &InMemoryDatabase, gateway: &MockPaymentGateway) -> RefundEnvironment {
        let repos = db.repositories();
        RefundEnvironment {
            bookings: repos.bookings,
            refunds: repos.refunds,
            users: repos.users,
            gateway: Arc::new(gateway.clone()),
            email: Arc::new(RecordingEmailProvider::new()),
            clock: Arc::new(test_clock()),
        }
    }

    #[test]
    fn test_request_rules() {
        let user = sample_user("a@example.com");
        let now = Utc::now();
        let booking = booking_for(&user, departure_in(10));

        assert_eq!(RefundReducer::validate_request(&user, &booking, None, now), Ok(()));
        assert_eq!(
            RefundReducer::validate_request(&sample_user("b@example.com"), &booking, None, now),
            Err(RefundDenial::NotBookingOwner)
        );
        assert_eq!(
            RefundReducer::validate_request(&user, &booking, None, booking.start_date),
            Err(RefundDenial::TourAlreadyStarted)
        );
        let existing = Refund::pending(&booking, now);
        assert_eq!(
            RefundReducer::validate_request(&user, &booking, Some(&existing), now),
            Err(RefundDenial::AlreadyRequested)
        );
        let refunded = Booking {
            refunded: true,
            ..booking.clone()
        };
        assert_eq!(
            RefundReducer::validate_request(&user, &refunded, None, now),
            Err(RefundDenial::AlreadyRefunded)
        );
    }

    #[test]
    fn test_terminal_refund_cannot_be_decided_again() {
        let db = InMemoryDatabase::new();
        let gateway = MockPaymentGateway::new();
        let user = sample_user("a@example.com");
        let booking = booking_for(&user, departure_in(10));
        let mut refund = Refund::pending(&booking, Utc::now());
        refund.status = RefundStatus::Rejected;
        let request_id = Uuid::new_v4();

        let mut state = RefundState::default();
        state.pending.insert(request_id, PendingRefund::Process);

        ReducerTest::new(RefundReducer::new())
            .with_env(env(&db, &gateway))
            .given_state(state)
            .when_action(RefundAction::RefundLoaded {
                request_id,
                refund,
                booking: Some(Box::new(booking)),
            })
            .then_effects(|effects| assert_eq!(effects.len(), 1))
            .run();
        assert!(gateway.refunds().is_empty());
    }

    #[tokio::test]
    async fn test_process_refunds_each_intent_and_releases_places() {
        let db = InMemoryDatabase::new();
        let gateway = MockPaymentGateway::new();
        let env = env(&db, &gateway);
        let tour = sample_tour("The Forest Hiker", 10);
        TourRepository::insert(&db, &tour).await.unwrap();
        let user = sample_user("a@example.com");

        let completed = |intent: &str, travelers: u32| CompletedCheckout {
            session_id: format!("cs_{intent}"),
            payment_intent: intent.to_string(),
            amount_total: tour.price.multiply(travelers),
            customer_email: None,
            metadata: CheckoutMetadata {
                tour: tour.id,
                user: user.id,
                start_date: tour.start_dates[0].date,
                num_participants: travelers,
                booking: None,
            },
        };
        db.finalize_checkout(&completed("pi_1", 2), Utc::now()).await.unwrap();
        let booking = db
            .finalize_checkout(&completed("pi_2", 1), Utc::now())
            .await
            .unwrap()
            .booking;

        let refund = Refund::pending(&booking, Utc::now());
        RefundRepository::insert(&db, &refund).await.unwrap();

        let reducer = RefundReducer::new();
        let mut state = RefundState::default();
        let request_id = Uuid::new_v4();
        state.pending.insert(request_id, PendingRefund::Process);

        let actions = effects::resolve(reducer.reduce(
            &mut state,
            RefundAction::RefundLoaded {
                request_id,
                refund: refund.clone(),
                booking: Some(Box::new(booking)),
            },
            &env,
        ))
        .await;

        assert_eq!(
            gateway.refunds(),
            vec![
                ("pi_1".to_string(), tour.price.multiply(2)),
                ("pi_2".to_string(), tour.price),
            ]
        );
        let RefundAction::RefundProcessed { refund: done, .. } = &actions[0] else {
            panic!("expected processed refund, got {actions:?}");
        };
        assert_eq!(done.status, RefundStatus::Processed);
        assert_eq!(done.provider_refund_id.as_deref().map(|ids| ids.split(',').count()), Some(2));
        assert_eq!(db.raw_tour(tour.id).unwrap().start_dates[0].participants_booked, 0);

        reducer.reduce(&mut state, actions[0].clone(), &env);
        assert_eq!(state.stats.processed, 1);
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_refund_pending() {
        let db = InMemoryDatabase::new();
        let gateway = MockPaymentGateway::new();
        gateway.fail_refunds(true);
        let env = env(&db, &gateway);
        let user = sample_user("a@example.com");
        let booking = booking_for(&user, departure_in(10));
        let refund = Refund::pending(&booking, Utc::now());
        RefundRepository::insert(&db, &refund).await.unwrap();

        let reducer = RefundReducer::new();
        let mut state = RefundState::default();
        let request_id = Uuid::new_v4();
        state.pending.insert(request_id, PendingRefund::Process);

        let actions = effects::resolve(reducer.reduce(
            &mut state,
            RefundAction::RefundLoaded {
                request_id,
                refund: refund.clone(),
                booking: Some(Box::new(booking)),
            },
            &env,
        ))
        .await;
        let RefundAction::RefundFailed { error, .. } = &actions[0] else {
            panic!("expected failure, got {actions:?}");
        };
        assert!(error.contains("cannot be refunded"));
        assert!(actions[0].ends_request(request_id));

        reducer.reduce(&mut state, actions[0].clone(), &env);
        assert_eq!(state.stats.failed, 1);
        let stored = RefundRepository::find(&db, refund.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RefundStatus::Pending);
    }
}
