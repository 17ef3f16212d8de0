//! Domain value types for Natours.
//!
//! Identifiers, money, roles and the small value objects that entities are
//! built from. Entities themselves live in [`crate::models`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a user
    UserId
);
entity_id!(
    /// Unique identifier for a tour
    TourId
);
entity_id!(
    /// Unique identifier for a review
    ReviewId
);
entity_id!(
    /// Unique identifier for a booking
    BookingId
);
entity_id!(
    /// Unique identifier for a refund request
    RefundId
);
entity_id!(
    /// Unique identifier for a failed booking record
    FailedBookingId
);

// ============================================================================
// Money
// ============================================================================

/// An amount of money in the smallest currency unit (cents).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates money from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates money from whole currency units
    #[must_use]
    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars * 100)
    }

    /// Amount in cents
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Multiply by a quantity
    #[must_use]
    pub const fn multiply(&self, quantity: u32) -> Self {
        Self(self.0 * quantity as i64)
    }

    /// Add another amount, `None` on overflow
    #[must_use]
    pub const fn checked_add(&self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }

    /// Whether the amount is strictly positive
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

// ============================================================================
// Enumerations
// ============================================================================

/// Error for enum values that fail to parse from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// User role
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Regular customer
    #[default]
    User,
    /// Tour guide
    Guide,
    /// Lead guide (manages tours)
    LeadGuide,
    /// Administrator
    Admin,
}

impl Role {
    /// Textual form used in the database and JSON
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Guide => "guide",
            Self::LeadGuide => "lead-guide",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "guide" => Ok(Self::Guide),
            "lead-guide" => Ok(Self::LeadGuide),
            "admin" => Ok(Self::Admin),
            other => Err(ParseEnumError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tour difficulty
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Easy
    Easy,
    /// Medium
    Medium,
    /// Difficult
    Difficult,
}

impl Difficulty {
    /// Textual form used in the database and JSON
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Difficult => "difficult",
        }
    }
}

impl FromStr for Difficulty {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "difficult" => Ok(Self::Difficult),
            other => Err(ParseEnumError {
                kind: "difficulty",
                value: other.to_string(),
            }),
        }
    }
}

/// Refund lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    /// Waiting for an admin decision
    Pending,
    /// Money returned, booking released
    Processed,
    /// Refused by an admin
    Rejected,
}

/// A refund status change that the lifecycle does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("refund cannot move from {from} to {to}")]
pub struct InvalidTransition {
    /// Current status
    pub from: RefundStatus,
    /// Requested status
    pub to: RefundStatus,
}

impl RefundStatus {
    /// Textual form used in the database and JSON
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Rejected => "rejected",
        }
    }

    /// Processed and rejected refunds never change again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Validate a status change.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for anything other than
    /// `pending → processed` or `pending → rejected`.
    pub const fn transition(self, to: Self) -> Result<Self, InvalidTransition> {
        match (self, to) {
            (Self::Pending, Self::Processed | Self::Rejected) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "rejected" => Ok(Self::Rejected),
            other => Err(ParseEnumError {
                kind: "refund status",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Geography
// ============================================================================

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A `[longitude, latitude]` pair, serialized GeoJSON style.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    /// Longitude in degrees
    pub lng: f64,
    /// Latitude in degrees
    pub lat: f64,
}

impl From<[f64; 2]> for Coordinates {
    fn from([lng, lat]: [f64; 2]) -> Self {
        Self { lng, lat }
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.lng, c.lat]
    }
}

impl Coordinates {
    /// Parse the `lat,lng` form used in URLs.
    ///
    /// # Errors
    ///
    /// Returns a message when the text is not two comma-separated numbers in range.
    pub fn parse_lat_lng(s: &str) -> Result<Self, String> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| "Please provide latitude and longitude in the format lat,lng".to_string())?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| format!("Invalid latitude: {lat}"))?;
        let lng: f64 = lng
            .trim()
            .parse()
            .map_err(|_| format!("Invalid longitude: {lng}"))?;

        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(format!("Coordinates out of range: {lat},{lng}"));
        }

        Ok(Self { lng, lat })
    }

    /// Great-circle distance in metres (haversine).
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Distance unit accepted by the geo endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceUnit {
    /// Miles
    Miles,
    /// Kilometres
    Kilometers,
}

impl DistanceUnit {
    /// Metres per unit
    #[must_use]
    pub const fn metres(self) -> f64 {
        match self {
            Self::Miles => 1_609.344,
            Self::Kilometers => 1_000.0,
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mi" => Ok(Self::Miles),
            "km" => Ok(Self::Kilometers),
            other => Err(ParseEnumError {
                kind: "unit",
                value: other.to_string(),
            }),
        }
    }
}

/// Where a tour starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartLocation {
    /// Human readable place name
    pub description: String,
    /// Street address
    #[serde(default)]
    pub address: Option<String>,
    /// Position
    pub coordinates: Coordinates,
}

/// A stop on the tour itinerary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Human readable place name
    pub description: String,
    /// Position
    pub coordinates: Coordinates,
    /// Tour day on which the stop is visited
    pub day: u32,
}

// ============================================================================
// Start dates
// ============================================================================

/// One scheduled departure of a tour and how many travelers it has.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartDate {
    /// Departure time
    pub date: DateTime<Utc>,
    /// Travelers booked on this departure
    #[serde(default)]
    pub participants_booked: u32,
}

impl StartDate {
    /// A departure with nobody booked yet
    #[must_use]
    pub const fn new(date: DateTime<Utc>) -> Self {
        Self {
            date,
            participants_booked: 0,
        }
    }

    /// Places left for a tour with the given group size
    #[must_use]
    pub const fn available_places(&self, max_group_size: u32) -> u32 {
        max_group_size.saturating_sub(self.participants_booked)
    }

    /// No places left
    #[must_use]
    pub const fn sold_out(&self, max_group_size: u32) -> bool {
        self.available_places(max_group_size) == 0
    }

    /// Whether `requested` more travelers still fit in the group.
    #[must_use]
    pub fn can_accommodate(&self, max_group_size: u32, requested: u32) -> bool {
        u64::from(self.participants_booked) + u64::from(requested) <= u64::from(max_group_size)
    }

    /// Remove travelers, never going below zero
    pub const fn release(&mut self, travelers: u32) {
        self.participants_booked = self.participants_booked.saturating_sub(travelers);
    }
}

/// Aggregate rating for a tour.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingsSummary {
    /// Mean rating rounded to one decimal
    pub average: f64,
    /// Number of reviews
    pub quantity: u32,
}

impl RatingsSummary {
    /// Rating of a tour nobody has reviewed yet
    pub const DEFAULT_AVERAGE: f64 = 4.5;

    /// Compute from individual ratings
    #[must_use]
    pub fn from_ratings(ratings: &[u8]) -> Self {
        if ratings.is_empty() {
            return Self::default();
        }
        let sum: f64 = ratings.iter().map(|r| f64::from(*r)).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / ratings.len() as f64;
        Self {
            average: round_to_tenth(mean),
            quantity: u32::try_from(ratings.len()).unwrap_or(u32::MAX),
        }
    }
}

impl Default for RatingsSummary {
    fn default() -> Self {
        Self {
            average: Self::DEFAULT_AVERAGE,
            quantity: 0,
        }
    }
}

/// Round to one decimal place (4.666 → 4.7).
#[must_use]
pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
