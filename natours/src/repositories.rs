//! Repository traits for Natours persistence.
//!
//! Every table is reached through one of these traits so handlers and
//! reducers can run against PostgreSQL ([`crate::postgres`]) or the
//! in-memory implementation ([`crate::mocks`]) unchanged.
//!
//! Operations that must be atomic (checkout reconciliation, refund
//! completion, manual bookings, review rating recomputation) are single
//! trait methods so each implementation can wrap them in its own
//! transaction.

use crate::models::{Booking, FailedBooking, Refund, Review, Tour, User};
use crate::payment_gateway::CompletedCheckout;
use crate::types::{
    BookingId, FailedBookingId, RatingsSummary, RefundId, ReviewId, TourId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result type for repository operations
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors returned by repositories
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// The row the operation depends on does not exist
    #[error("{resource} not found")]
    NotFound {
        /// What was missing
        resource: &'static str,
    },

    /// A uniqueness rule was violated
    #[error("{0}")]
    Conflict(String),

    /// The departure has too few places left
    #[error("only {available} places left on this date, {requested} requested")]
    CapacityExceeded {
        /// Travelers requested
        requested: u32,
        /// Places still free
        available: u32,
    },

    /// The row exists but is in a state that forbids the operation
    #[error("{0}")]
    InvalidState(String),

    /// Database driver failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

/// Deleting a user whose bookings still hold places.
pub(crate) fn user_has_bookings() -> RepositoryError {
    RepositoryError::Conflict(
        "This user still has bookings. Refund or delete them before deleting the user".into(),
    )
}

/// A tour update that would leave a departure with more travelers than places.
pub(crate) fn group_too_small(max_group_size: u32, date: DateTime<Utc>, booked: u32) -> RepositoryError {
    RepositoryError::InvalidState(format!(
        "Departure {} already has {booked} travelers, more than a group size of {max_group_size}",
        date.to_rfc3339()
    ))
}

/// How a completed checkout was reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// A new booking was inserted
    Created,
    /// Travelers were added to an existing booking
    TravelersAdded,
    /// The payment intent was already recorded; nothing changed
    AlreadyRecorded,
}

impl FinalizeOutcome {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::TravelersAdded => "travelers_added",
            Self::AlreadyRecorded => "already_recorded",
        }
    }
}

/// Result of a successful reconciliation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizedBooking {
    /// What happened
    pub outcome: FinalizeOutcome,
    /// The booking after the transaction
    pub booking: Booking,
}

/// Accounts. Inactive users are invisible to every read.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] when the email is taken.
    async fn insert(&self, user: &User) -> RepositoryResult<()>;

    /// Find an active user by ID.
    async fn find(&self, id: UserId) -> RepositoryResult<Option<User>>;

    /// Find an active user by (lower-cased) email.
    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;

    /// All active users.
    async fn list(&self) -> RepositoryResult<Vec<User>>;

    /// Overwrite a user. Returns `false` if it does not exist.
    async fn update(&self, user: &User) -> RepositoryResult<bool>;

    /// Permanently remove a user with their reviews, refunded bookings and
    /// refunds, recomputing the rating of every tour they reviewed.
    /// Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] while any of their bookings still holds
    /// places.
    async fn delete(&self, id: UserId) -> RepositoryResult<bool>;
}

/// Magic-link tokens and bearer sessions, stored by token hash.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Store a single-use login token.
    async fn store_login_token(
        &self,
        token_hash: &str,
        user: UserId,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    /// Delete and return the owner of an unexpired login token.
    async fn consume_login_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<UserId>>;

    /// Open a session.
    async fn create_session(
        &self,
        token_hash: &str,
        user: UserId,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    /// Owner of an unexpired session.
    async fn find_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<UserId>>;

    /// Close one session. Returns `false` if it did not exist.
    async fn revoke_session(&self, token_hash: &str) -> RepositoryResult<bool>;

    /// Close every session of a user.
    async fn revoke_user_sessions(&self, user: UserId) -> RepositoryResult<()>;
}

/// Tours and their departures. Secret tours are invisible to every read.
#[async_trait]
pub trait TourRepository: Send + Sync {
    /// Insert a tour with its departures.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] when the name is taken.
    async fn insert(&self, tour: &Tour) -> RepositoryResult<()>;

    /// Find a visible tour by ID.
    async fn find(&self, id: TourId) -> RepositoryResult<Option<Tour>>;

    /// Find a visible tour by slug.
    async fn find_by_slug(&self, slug: &str) -> RepositoryResult<Option<Tour>>;

    /// All visible tours.
    async fn list(&self) -> RepositoryResult<Vec<Tour>>;

    /// Overwrite a tour's fields and schedule.
    ///
    /// Booked counters of departures that stay scheduled are left untouched.
    /// Returns `false` if the tour does not exist.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidState`] when a departure with travelers
    /// would be removed, or when the new group size is below a kept
    /// departure's booked count.
    async fn update(&self, tour: &Tour) -> RepositoryResult<bool>;

    /// Remove a tour. Returns `false` if it does not exist.
    async fn delete(&self, id: TourId) -> RepositoryResult<bool>;
}

/// Reviews. Every write recomputes the tour's rating in the same transaction.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Insert a review and return the tour's new rating.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] when the user already reviewed the tour.
    async fn insert(&self, review: &Review) -> RepositoryResult<RatingsSummary>;

    /// Find a review by ID.
    async fn find(&self, id: ReviewId) -> RepositoryResult<Option<Review>>;

    /// All reviews, or those of one tour.
    async fn list(&self, tour: Option<TourId>) -> RepositoryResult<Vec<Review>>;

    /// Overwrite text and rating. `None` if the review does not exist.
    async fn update(&self, review: &Review) -> RepositoryResult<Option<RatingsSummary>>;

    /// Remove a review. `None` if it does not exist.
    async fn delete(&self, id: ReviewId) -> RepositoryResult<Option<RatingsSummary>>;
}

/// Bookings and the capacity counters they consume.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Insert a booking made by an operator, reserving its places.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] for an unknown tour or departure,
    /// [`RepositoryError::CapacityExceeded`] when the group is full.
    async fn create(&self, booking: &Booking) -> RepositoryResult<()>;

    /// Find a booking by ID.
    async fn find(&self, id: BookingId) -> RepositoryResult<Option<Booking>>;

    /// All bookings.
    async fn list(&self) -> RepositoryResult<Vec<Booking>>;

    /// Bookings of one user.
    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Booking>>;

    /// The user's non-refunded booking for a departure, if any.
    async fn find_active(
        &self,
        user: UserId,
        tour: TourId,
        start_date: DateTime<Utc>,
    ) -> RepositoryResult<Option<Booking>>;

    /// Whether the user holds a paid, non-refunded booking for the tour.
    async fn has_paid_booking(&self, user: UserId, tour: TourId) -> RepositoryResult<bool>;

    /// Overwrite price and paid flag. Returns `false` if it does not exist.
    async fn update(&self, booking: &Booking) -> RepositoryResult<bool>;

    /// Remove a booking, releasing its places. Returns `false` if it does not exist.
    async fn delete(&self, id: BookingId) -> RepositoryResult<bool>;

    /// Turn a completed checkout into a booking, atomically.
    ///
    /// In one transaction: skip if the payment intent is already recorded,
    /// lock the departure, re-validate capacity, increment the booked
    /// counter, then insert a booking or add travelers to the existing one
    /// and record the payment intent. Nothing is written on error.
    async fn finalize_checkout(
        &self,
        checkout: &CompletedCheckout,
        now: DateTime<Utc>,
    ) -> RepositoryResult<FinalizedBooking>;
}

/// Refund requests.
#[async_trait]
pub trait RefundRepository: Send + Sync {
    /// Insert a refund request.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] when the booking already has one.
    async fn insert(&self, refund: &Refund) -> RepositoryResult<()>;

    /// Find a refund by ID.
    async fn find(&self, id: RefundId) -> RepositoryResult<Option<Refund>>;

    /// The refund request of a booking, if any.
    async fn find_for_booking(&self, booking: BookingId) -> RepositoryResult<Option<Refund>>;

    /// All refunds.
    async fn list(&self) -> RepositoryResult<Vec<Refund>>;

    /// Refunds requested by one user.
    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Refund>>;

    /// Move a pending refund to rejected.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidState`] if it is no longer pending.
    async fn reject(&self, id: RefundId, at: DateTime<Utc>) -> RepositoryResult<Refund>;

    /// Mark a pending refund processed, flag its booking refunded and
    /// release the booking's places, in one transaction.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::InvalidState`] if it is no longer pending.
    async fn complete(
        &self,
        id: RefundId,
        provider_refund_id: &str,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Refund>;
}

/// Checkouts that were paid but could not be reconciled.
#[async_trait]
pub trait FailedBookingRepository: Send + Sync {
    /// Record a failure.
    async fn record(&self, failed: &FailedBooking) -> RepositoryResult<()>;

    /// All failures, newest first.
    async fn list(&self) -> RepositoryResult<Vec<FailedBooking>>;

    /// Mark a failure handled. `None` if it does not exist.
    async fn resolve(
        &self,
        id: FailedBookingId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<FailedBooking>>;
}

/// Connectivity check for the readiness probe.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    /// Round-trip to the database.
    async fn ping(&self) -> RepositoryResult<()>;
}

/// Every repository the application needs, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    /// Accounts
    pub users: Arc<dyn UserRepository>,
    /// Login tokens and sessions
    pub sessions: Arc<dyn SessionRepository>,
    /// Tours
    pub tours: Arc<dyn TourRepository>,
    /// Reviews
    pub reviews: Arc<dyn ReviewRepository>,
    /// Bookings
    pub bookings: Arc<dyn BookingRepository>,
    /// Refunds
    pub refunds: Arc<dyn RefundRepository>,
    /// Failed bookings
    pub failed_bookings: Arc<dyn FailedBookingRepository>,
    /// Readiness probe
    pub database: Arc<dyn DatabaseProbe>,
}
