//! In-memory database implementing every repository trait.

use crate::models::{Booking, FailedBooking, PaymentIntent, Refund, Review, Tour, User};
use crate::payment_gateway::CompletedCheckout;
use crate::repositories::{
    group_too_small, user_has_bookings, BookingRepository, DatabaseProbe, FailedBookingRepository,
    FinalizeOutcome, FinalizedBooking, RefundRepository, Repositories, RepositoryError,
    RepositoryResult, ReviewRepository, SessionRepository, TourRepository, UserRepository,
};
use crate::types::{
    BookingId, FailedBookingId, RatingsSummary, RefundId, RefundStatus, ReviewId, TourId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    login_tokens: HashMap<String, (UserId, DateTime<Utc>)>,
    sessions: HashMap<String, (UserId, DateTime<Utc>)>,
    tours: HashMap<TourId, Tour>,
    reviews: HashMap<ReviewId, Review>,
    bookings: HashMap<BookingId, Booking>,
    refunds: HashMap<RefundId, Refund>,
    failed_bookings: HashMap<FailedBookingId, FailedBooking>,
    fail_finalize: Option<String>,
    unavailable: bool,
}

/// Shared in-memory tables. Clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryDatabase {
    /// Create an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every repository backed by this database.
    #[must_use]
    pub fn repositories(&self) -> Repositories {
        Repositories {
            users: Arc::new(self.clone()),
            sessions: Arc::new(self.clone()),
            tours: Arc::new(self.clone()),
            reviews: Arc::new(self.clone()),
            bookings: Arc::new(self.clone()),
            refunds: Arc::new(self.clone()),
            failed_bookings: Arc::new(self.clone()),
            database: Arc::new(self.clone()),
        }
    }

    /// Make checkout finalization fail with `error` (or succeed again).
    pub fn fail_finalize(&self, error: Option<&str>) {
        self.lock().fail_finalize = error.map(ToString::to_string);
    }

    /// Make the readiness ping fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// A tour regardless of visibility.
    #[must_use]
    pub fn raw_tour(&self, id: TourId) -> Option<Tour> {
        self.lock().tours.get(&id).cloned()
    }

    /// Number of bookings stored.
    #[must_use]
    pub fn booking_count(&self) -> usize {
        self.lock().bookings.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

impl Tables {
    fn recompute_ratings(&mut self, tour: TourId) -> RatingsSummary {
        let ratings: Vec<u8> = self
            .reviews
            .values()
            .filter(|r| r.tour == tour)
            .map(|r| r.rating)
            .collect();
        let summary = RatingsSummary::from_ratings(&ratings);
        if let Some(tour) = self.tours.get_mut(&tour) {
            tour.apply_ratings(summary);
        }
        summary
    }

    fn reserve(&mut self, tour: TourId, date: DateTime<Utc>, travelers: u32) -> RepositoryResult<()> {
        let tour = self
            .tours
            .get_mut(&tour)
            .ok_or(RepositoryError::NotFound { resource: "tour" })?;
        let max = tour.max_group_size;
        let start = tour
            .start_date_mut(date)
            .ok_or(RepositoryError::NotFound { resource: "start date" })?;
        if !start.can_accommodate(max, travelers) {
            return Err(RepositoryError::CapacityExceeded {
                requested: travelers,
                available: start.available_places(max),
            });
        }
        start.participants_booked += travelers;
        Ok(())
    }

    fn release(&mut self, booking: &Booking) {
        if let Some(start) = self
            .tours
            .get_mut(&booking.tour)
            .and_then(|t| t.start_date_mut(booking.start_date))
        {
            start.release(booking.num_participants);
        }
    }

    fn active_booking(&self, user: UserId, tour: TourId, date: DateTime<Utc>) -> Option<&Booking> {
        self.bookings
            .values()
            .find(|b| b.user == user && b.tour == tour && b.start_date == date && !b.refunded)
    }

    fn finalize(&mut self, checkout: &CompletedCheckout, now: DateTime<Utc>) -> RepositoryResult<FinalizedBooking> {
        if let Some(existing) = self
            .bookings
            .values()
            .find(|b| b.has_payment_intent(&checkout.payment_intent))
        {
            return Ok(FinalizedBooking {
                outcome: FinalizeOutcome::AlreadyRecorded,
                booking: existing.clone(),
            });
        }
        if let Some(error) = &self.fail_finalize {
            return Err(RepositoryError::InvalidState(error.clone()));
        }

        let meta = &checkout.metadata;
        if meta.num_participants == 0 {
            return Err(RepositoryError::InvalidState("no travelers in checkout".into()));
        }

        let target = match meta.booking {
            Some(id) => {
                let booking = self
                    .bookings
                    .get(&id)
                    .ok_or(RepositoryError::NotFound { resource: "booking" })?;
                if booking.user != meta.user
                    || booking.tour != meta.tour
                    || booking.start_date != meta.start_date
                {
                    return Err(RepositoryError::InvalidState(
                        "checkout does not match the booking".into(),
                    ));
                }
                if booking.refunded {
                    return Err(RepositoryError::InvalidState("booking was refunded".into()));
                }
                Some(id)
            },
            None => self
                .active_booking(meta.user, meta.tour, meta.start_date)
                .map(|b| b.id),
        };

        let extended_price = match target.and_then(|id| self.bookings.get(&id)) {
            Some(booking) => Some(
                booking
                    .price
                    .checked_add(checkout.amount_total)
                    .ok_or_else(|| RepositoryError::InvalidState("booking price overflow".into()))?,
            ),
            None => None,
        };

        self.reserve(meta.tour, meta.start_date, meta.num_participants)?;

        let intent = PaymentIntent {
            id: checkout.payment_intent.clone(),
            amount: checkout.amount_total,
        };

        let finalized = match (target.and_then(|id| self.bookings.get_mut(&id)), extended_price) {
            (Some(booking), Some(price)) => {
                booking.num_participants += meta.num_participants;
                booking.price = price;
                booking.payment_intents.push(intent);
                FinalizedBooking {
                    outcome: FinalizeOutcome::TravelersAdded,
                    booking: booking.clone(),
                }
            },
            _ => {
                let booking = Booking {
                    id: BookingId::new(),
                    tour: meta.tour,
                    user: meta.user,
                    price: checkout.amount_total,
                    start_date: meta.start_date,
                    num_participants: meta.num_participants,
                    payment_intents: vec![intent],
                    paid: true,
                    refunded: false,
                    created_at: now,
                };
                self.bookings.insert(booking.id, booking.clone());
                FinalizedBooking {
                    outcome: FinalizeOutcome::Created,
                    booking,
                }
            },
        };
        Ok(finalized)
    }
}

#[async_trait]
impl UserRepository for InMemoryDatabase {
    async fn insert(&self, user: &User) -> RepositoryResult<()> {
        let mut tables = self.lock();
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::Conflict(format!(
                "Email {} is already registered",
                user.email
            )));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find(&self, id: UserId) -> RepositoryResult<Option<User>> {
        Ok(self.lock().users.get(&id).filter(|u| u.active).cloned())
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.active && u.email == email)
            .cloned())
    }

    async fn list(&self) -> RepositoryResult<Vec<User>> {
        let users = self.lock().users.values().filter(|u| u.active).cloned().collect();
        Ok(sorted_by(users, |u: &User| u.created_at))
    }

    async fn update(&self, user: &User) -> RepositoryResult<bool> {
        let mut tables = self.lock();
        if tables
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(RepositoryError::Conflict(format!(
                "Email {} is already registered",
                user.email
            )));
        }
        match tables.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn delete(&self, id: UserId) -> RepositoryResult<bool> {
        let mut tables = self.lock();
        if !tables.users.contains_key(&id) {
            return Ok(false);
        }
        if tables.bookings.values().any(|b| b.user == id && b.holds_places()) {
            return Err(user_has_bookings());
        }

        let reviewed: Vec<TourId> = tables
            .reviews
            .values()
            .filter(|r| r.user == id)
            .map(|r| r.tour)
            .collect();
        tables.reviews.retain(|_, r| r.user != id);
        for tour in reviewed {
            tables.recompute_ratings(tour);
        }
        tables.refunds.retain(|_, r| r.user != id);
        tables.bookings.retain(|_, b| b.user != id);
        tables.sessions.retain(|_, (user, _)| *user != id);
        tables.login_tokens.retain(|_, (user, _)| *user != id);
        tables.users.remove(&id);
        Ok(true)
    }
}

#[async_trait]
impl SessionRepository for InMemoryDatabase {
    async fn store_login_token(
        &self,
        token_hash: &str,
        user: UserId,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        self.lock()
            .login_tokens
            .insert(token_hash.to_string(), (user, expires_at));
        Ok(())
    }

    async fn consume_login_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<UserId>> {
        Ok(self
            .lock()
            .login_tokens
            .remove(token_hash)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(user, _)| user))
    }

    async fn create_session(
        &self,
        token_hash: &str,
        user: UserId,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        self.lock()
            .sessions
            .insert(token_hash.to_string(), (user, expires_at));
        Ok(())
    }

    async fn find_session(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<UserId>> {
        Ok(self
            .lock()
            .sessions
            .get(token_hash)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(user, _)| *user))
    }

    async fn revoke_session(&self, token_hash: &str) -> RepositoryResult<bool> {
        Ok(self.lock().sessions.remove(token_hash).is_some())
    }

    async fn revoke_user_sessions(&self, user: UserId) -> RepositoryResult<()> {
        self.lock().sessions.retain(|_, (owner, _)| *owner != user);
        Ok(())
    }
}

#[async_trait]
impl TourRepository for InMemoryDatabase {
    async fn insert(&self, tour: &Tour) -> RepositoryResult<()> {
        let mut tables = self.lock();
        if tables
            .tours
            .values()
            .any(|t| t.name == tour.name || t.slug == tour.slug)
        {
            return Err(RepositoryError::Conflict(format!(
                "A tour named {} already exists",
                tour.name
            )));
        }
        tables.tours.insert(tour.id, tour.clone());
        Ok(())
    }

    async fn find(&self, id: TourId) -> RepositoryResult<Option<Tour>> {
        Ok(self.lock().tours.get(&id).filter(|t| !t.secret_tour).cloned())
    }

    async fn find_by_slug(&self, slug: &str) -> RepositoryResult<Option<Tour>> {
        Ok(self
            .lock()
            .tours
            .values()
            .find(|t| !t.secret_tour && t.slug == slug)
            .cloned())
    }

    async fn list(&self) -> RepositoryResult<Vec<Tour>> {
        let tours = self
            .lock()
            .tours
            .values()
            .filter(|t| !t.secret_tour)
            .cloned()
            .collect();
        Ok(sorted_by(tours, |t: &Tour| t.created_at))
    }

    async fn update(&self, tour: &Tour) -> RepositoryResult<bool> {
        let mut tables = self.lock();
        if tables
            .tours
            .values()
            .any(|t| t.id != tour.id && (t.name == tour.name || t.slug == tour.slug))
        {
            return Err(RepositoryError::Conflict(format!(
                "A tour named {} already exists",
                tour.name
            )));
        }
        let Some(existing) = tables.tours.get_mut(&tour.id) else {
            return Ok(false);
        };

        if let Some(dropped) = existing
            .start_dates
            .iter()
            .find(|d| d.participants_booked > 0 && tour.start_date(d.date).is_none())
        {
            return Err(RepositoryError::InvalidState(format!(
                "Departure {} already has travelers",
                dropped.date.to_rfc3339()
            )));
        }

        if let Some(crowded) = existing.start_dates.iter().find(|d| {
            d.participants_booked > tour.max_group_size && tour.start_date(d.date).is_some()
        }) {
            return Err(group_too_small(
                tour.max_group_size,
                crowded.date,
                crowded.participants_booked,
            ));
        }

        let mut updated = tour.clone();
        for date in &mut updated.start_dates {
            date.participants_booked = existing
                .start_date(date.date)
                .map_or(0, |d| d.participants_booked);
        }
        updated.ratings_average = existing.ratings_average;
        updated.ratings_quantity = existing.ratings_quantity;
        *existing = updated;
        Ok(true)
    }

    async fn delete(&self, id: TourId) -> RepositoryResult<bool> {
        let mut tables = self.lock();
        tables.reviews.retain(|_, r| r.tour != id);
        Ok(tables.tours.remove(&id).is_some())
    }
}

#[async_trait]
impl ReviewRepository for InMemoryDatabase {
    async fn insert(&self, review: &Review) -> RepositoryResult<RatingsSummary> {
        let mut tables = self.lock();
        if !tables.tours.contains_key(&review.tour) {
            return Err(RepositoryError::NotFound { resource: "tour" });
        }
        if tables
            .reviews
            .values()
            .any(|r| r.tour == review.tour && r.user == review.user)
        {
            return Err(RepositoryError::Conflict(
                "You have already reviewed this tour".into(),
            ));
        }
        tables.reviews.insert(review.id, review.clone());
        Ok(tables.recompute_ratings(review.tour))
    }

    async fn find(&self, id: ReviewId) -> RepositoryResult<Option<Review>> {
        Ok(self.lock().reviews.get(&id).cloned())
    }

    async fn list(&self, tour: Option<TourId>) -> RepositoryResult<Vec<Review>> {
        let reviews = self
            .lock()
            .reviews
            .values()
            .filter(|r| tour.is_none_or(|t| r.tour == t))
            .cloned()
            .collect();
        Ok(sorted_by(reviews, |r: &Review| r.created_at))
    }

    async fn update(&self, review: &Review) -> RepositoryResult<Option<RatingsSummary>> {
        let mut tables = self.lock();
        let Some(existing) = tables.reviews.get_mut(&review.id) else {
            return Ok(None);
        };
        existing.review.clone_from(&review.review);
        existing.rating = review.rating;
        let tour = existing.tour;
        Ok(Some(tables.recompute_ratings(tour)))
    }

    async fn delete(&self, id: ReviewId) -> RepositoryResult<Option<RatingsSummary>> {
        let mut tables = self.lock();
        let Some(removed) = tables.reviews.remove(&id) else {
            return Ok(None);
        };
        Ok(Some(tables.recompute_ratings(removed.tour)))
    }
}

#[async_trait]
impl BookingRepository for InMemoryDatabase {
    async fn create(&self, booking: &Booking) -> RepositoryResult<()> {
        let mut tables = self.lock();
        tables.reserve(booking.tour, booking.start_date, booking.num_participants)?;
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn find(&self, id: BookingId) -> RepositoryResult<Option<Booking>> {
        Ok(self.lock().bookings.get(&id).cloned())
    }

    async fn list(&self) -> RepositoryResult<Vec<Booking>> {
        let bookings = self.lock().bookings.values().cloned().collect();
        Ok(sorted_by(bookings, |b: &Booking| b.created_at))
    }

    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Booking>> {
        let bookings = self
            .lock()
            .bookings
            .values()
            .filter(|b| b.user == user)
            .cloned()
            .collect();
        Ok(sorted_by(bookings, |b: &Booking| b.created_at))
    }

    async fn find_active(
        &self,
        user: UserId,
        tour: TourId,
        start_date: DateTime<Utc>,
    ) -> RepositoryResult<Option<Booking>> {
        Ok(self.lock().active_booking(user, tour, start_date).cloned())
    }

    async fn has_paid_booking(&self, user: UserId, tour: TourId) -> RepositoryResult<bool> {
        Ok(self
            .lock()
            .bookings
            .values()
            .any(|b| b.user == user && b.tour == tour && b.paid && !b.refunded))
    }

    async fn update(&self, booking: &Booking) -> RepositoryResult<bool> {
        match self.lock().bookings.get_mut(&booking.id) {
            Some(existing) => {
                existing.price = booking.price;
                existing.paid = booking.paid;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn delete(&self, id: BookingId) -> RepositoryResult<bool> {
        let mut tables = self.lock();
        let Some(booking) = tables.bookings.remove(&id) else {
            return Ok(false);
        };
        if booking.holds_places() {
            tables.release(&booking);
        }
        tables.refunds.retain(|_, r| r.booking != id);
        Ok(true)
    }

    async fn finalize_checkout(
        &self,
        checkout: &CompletedCheckout,
        now: DateTime<Utc>,
    ) -> RepositoryResult<FinalizedBooking> {
        self.lock().finalize(checkout, now)
    }
}

#[async_trait]
impl RefundRepository for InMemoryDatabase {
    async fn insert(&self, refund: &Refund) -> RepositoryResult<()> {
        let mut tables = self.lock();
        if tables
            .refunds
            .values()
            .any(|r| r.booking == refund.booking && r.user == refund.user)
        {
            return Err(RepositoryError::Conflict(
                "A refund was already requested for this booking".into(),
            ));
        }
        tables.refunds.insert(refund.id, refund.clone());
        Ok(())
    }

    async fn find(&self, id: RefundId) -> RepositoryResult<Option<Refund>> {
        Ok(self.lock().refunds.get(&id).cloned())
    }

    async fn find_for_booking(&self, booking: BookingId) -> RepositoryResult<Option<Refund>> {
        Ok(self
            .lock()
            .refunds
            .values()
            .find(|r| r.booking == booking)
            .cloned())
    }

    async fn list(&self) -> RepositoryResult<Vec<Refund>> {
        let refunds = self.lock().refunds.values().cloned().collect();
        Ok(sorted_by(refunds, |r: &Refund| r.requested_at))
    }

    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Refund>> {
        let refunds = self
            .lock()
            .refunds
            .values()
            .filter(|r| r.user == user)
            .cloned()
            .collect();
        Ok(sorted_by(refunds, |r: &Refund| r.requested_at))
    }

    async fn reject(&self, id: RefundId, at: DateTime<Utc>) -> RepositoryResult<Refund> {
        let mut tables = self.lock();
        let refund = tables
            .refunds
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { resource: "refund" })?;
        refund.status = refund
            .status
            .transition(RefundStatus::Rejected)
            .map_err(|e| RepositoryError::InvalidState(e.to_string()))?;
        refund.processed_at = Some(at);
        Ok(refund.clone())
    }

    async fn complete(
        &self,
        id: RefundId,
        provider_refund_id: &str,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Refund> {
        let mut tables = self.lock();
        let refund = tables
            .refunds
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound { resource: "refund" })?;
        let status = refund
            .status
            .transition(RefundStatus::Processed)
            .map_err(|e| RepositoryError::InvalidState(e.to_string()))?;
        let booking = tables
            .bookings
            .get_mut(&refund.booking)
            .ok_or(RepositoryError::NotFound { resource: "booking" })?;
        if booking.refunded {
            return Err(RepositoryError::InvalidState("booking was already refunded".into()));
        }
        booking.refunded = true;
        let booking = booking.clone();
        tables.release(&booking);

        let refund = tables
            .refunds
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { resource: "refund" })?;
        refund.status = status;
        refund.processed_at = Some(at);
        refund.provider_refund_id = Some(provider_refund_id.to_string());
        Ok(refund.clone())
    }
}

#[async_trait]
impl FailedBookingRepository for InMemoryDatabase {
    async fn record(&self, failed: &FailedBooking) -> RepositoryResult<()> {
        self.lock().failed_bookings.insert(failed.id, failed.clone());
        Ok(())
    }

    async fn list(&self) -> RepositoryResult<Vec<FailedBooking>> {
        let mut failed: Vec<FailedBooking> = self.lock().failed_bookings.values().cloned().collect();
        failed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(failed)
    }

    async fn resolve(
        &self,
        id: FailedBookingId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<FailedBooking>> {
        Ok(self.lock().failed_bookings.get_mut(&id).map(|failed| {
            failed.resolved = true;
            failed.resolved_at = Some(at);
            failed.clone()
        }))
    }
}

#[async_trait]
impl DatabaseProbe for InMemoryDatabase {
    async fn ping(&self) -> RepositoryResult<()> {
        if self.lock().unavailable {
            return Err(RepositoryError::InvalidState("database unavailable".into()));
        }
        Ok(())
    }
}
