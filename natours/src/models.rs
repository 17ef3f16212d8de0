//! Entities persisted by Natours.

use crate::types::{
    BookingId, Coordinates, Difficulty, FailedBookingId, Location, Money, RatingsSummary,
    RefundId, RefundStatus, ReviewId, Role, StartDate, StartLocation, TourId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// User
// ============================================================================

/// Default profile picture for new accounts.
pub const DEFAULT_PHOTO: &str = "default.jpg";

/// A registered account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User ID
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Login email (unique, lower-cased)
    pub email: String,
    /// Profile picture file name
    pub photo: String,
    /// Permission level
    pub role: Role,
    /// Deactivated accounts are hidden from every query
    #[serde(skip_serializing, default = "active_by_default")]
    pub active: bool,
    /// Signup time
    pub created_at: DateTime<Utc>,
}

const fn active_by_default() -> bool {
    true
}

impl User {
    /// A new active user with the default role and photo.
    #[must_use]
    pub fn new(name: String, email: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            name,
            email,
            photo: DEFAULT_PHOTO.to_string(),
            role: Role::User,
            active: true,
            created_at,
        }
    }

    /// Whether the user holds one of `roles`.
    #[must_use]
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

// ============================================================================
// Tour
// ============================================================================

/// A bookable tour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tour {
    /// Tour ID
    pub id: TourId,
    /// Unique name, 10 to 40 characters
    pub name: String,
    /// URL slug derived from the name
    pub slug: String,
    /// Length in days
    pub duration: u32,
    /// Maximum travelers per departure
    pub max_group_size: u32,
    /// Difficulty rating
    pub difficulty: Difficulty,
    /// Mean review rating
    pub ratings_average: f64,
    /// Number of reviews
    pub ratings_quantity: u32,
    /// Price per traveler
    pub price: Money,
    /// Discounted price per traveler, always below `price`
    pub price_discount: Option<Money>,
    /// One-line summary
    pub summary: String,
    /// Long description
    pub description: Option<String>,
    /// Cover image file name
    pub image_cover: String,
    /// Gallery image file names
    pub images: Vec<String>,
    /// Where the tour begins
    pub start_location: Option<StartLocation>,
    /// Itinerary stops
    pub locations: Vec<Location>,
    /// Guides leading the tour
    pub guides: Vec<UserId>,
    /// Hidden tours never show up in queries
    #[serde(skip_serializing, default)]
    pub secret_tour: bool,
    /// Scheduled departures
    pub start_dates: Vec<StartDate>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Tour {
    /// Price a traveler pays (discount applied when present).
    #[must_use]
    pub fn effective_price(&self) -> Money {
        self.price_discount.unwrap_or(self.price)
    }

    /// Length in weeks
    #[must_use]
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }

    /// The departure on exactly `date`, if scheduled.
    #[must_use]
    pub fn start_date(&self, date: DateTime<Utc>) -> Option<&StartDate> {
        self.start_dates.iter().find(|d| d.date == date)
    }

    /// Mutable access to the departure on `date`.
    pub fn start_date_mut(&mut self, date: DateTime<Utc>) -> Option<&mut StartDate> {
        self.start_dates.iter_mut().find(|d| d.date == date)
    }

    /// Apply a recomputed rating.
    pub const fn apply_ratings(&mut self, ratings: RatingsSummary) {
        self.ratings_average = ratings.average;
        self.ratings_quantity = ratings.quantity;
    }

    /// Distance from `point` to the start location in metres.
    #[must_use]
    pub fn distance_from(&self, point: &Coordinates) -> Option<f64> {
        self.start_location
            .as_ref()
            .map(|start| start.coordinates.distance_to(point))
    }
}

/// Derive a URL slug from a tour name (`"The Sea Explorer"` → `"the-sea-explorer"`).
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

// ============================================================================
// Review
// ============================================================================

/// A traveler's review of a tour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Review ID
    pub id: ReviewId,
    /// Review text
    pub review: String,
    /// Rating from 1 to 5
    pub rating: u8,
    /// Reviewed tour
    pub tour: TourId,
    /// Author
    pub user: UserId,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Booking
// ============================================================================

/// One captured payment that paid for (part of) a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Provider payment intent ID
    pub id: String,
    /// Amount captured
    pub amount: Money,
}

/// A paid reservation of places on one departure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Booked tour
    pub tour: TourId,
    /// Traveler who booked
    pub user: UserId,
    /// Total paid for all participants
    pub price: Money,
    /// Departure
    pub start_date: DateTime<Utc>,
    /// Travelers on this booking
    pub num_participants: u32,
    /// Payments that funded the booking, in the order they were recorded
    pub payment_intents: Vec<PaymentIntent>,
    /// Payment captured
    pub paid: bool,
    /// Money returned and places released
    pub refunded: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Whether this booking still holds places on its departure.
    #[must_use]
    pub const fn holds_places(&self) -> bool {
        !self.refunded
    }

    /// Whether the payment intent is already recorded on the booking.
    #[must_use]
    pub fn has_payment_intent(&self, id: &str) -> bool {
        self.payment_intents.iter().any(|p| p.id == id)
    }
}

// ============================================================================
// Refund
// ============================================================================

/// A traveler's request to cancel a booking and get their money back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    /// Refund ID
    pub id: RefundId,
    /// Booking being refunded
    pub booking: BookingId,
    /// Requesting user
    pub user: UserId,
    /// Amount to return (the booking price)
    pub amount: Money,
    /// Lifecycle status
    pub status: RefundStatus,
    /// Request time
    pub requested_at: DateTime<Utc>,
    /// Decision time
    pub processed_at: Option<DateTime<Utc>>,
    /// Provider refund IDs, comma separated when several intents were refunded
    pub provider_refund_id: Option<String>,
}

impl Refund {
    /// A fresh pending refund for `booking`.
    #[must_use]
    pub fn pending(booking: &Booking, requested_at: DateTime<Utc>) -> Self {
        Self {
            id: RefundId::new(),
            booking: booking.id,
            user: booking.user,
            amount: booking.price,
            status: RefundStatus::Pending,
            requested_at,
            processed_at: None,
            provider_refund_id: None,
        }
    }
}

// ============================================================================
// FailedBooking
// ============================================================================

/// A paid checkout that could not be turned into a booking.
///
/// Written when the reconciliation transaction fails so an operator can
/// refund or book the traveler by hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBooking {
    /// Record ID
    pub id: FailedBookingId,
    /// Provider checkout session ID
    pub session_id: String,
    /// Tour from the session metadata
    pub tour: TourId,
    /// User from the session metadata
    pub user: UserId,
    /// Departure from the session metadata
    pub start_date: DateTime<Utc>,
    /// Travelers paid for
    pub num_participants: u32,
    /// Amount captured
    pub amount: Money,
    /// Provider payment intent ID
    pub payment_intent: String,
    /// Why reconciliation failed
    pub error: String,
    /// Handled by an operator
    pub resolved: bool,
    /// When the failure was recorded
    pub created_at: DateTime<Utc>,
    /// When an operator resolved it
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Forest Hiker"), "the-forest-hiker");
        assert_eq!(slugify("  The Sea -- Explorer! "), "the-sea-explorer");
    }

    #[test]
    fn test_user_role_check() {
        let user = User::new("Jonas".into(), "jonas@example.com".into(), Utc::now());
        assert!(user.has_any_role(&[Role::User, Role::Admin]));
        assert!(!user.has_any_role(&[Role::Admin]));
    }
}
