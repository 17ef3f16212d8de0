//! Sample entities for tests.

use crate::models::{slugify, Tour, User};
use crate::types::{
    Coordinates, Difficulty, Location, Money, Role, StartDate, StartLocation, TourId,
};
use chrono::{DateTime, Duration, Utc};

/// A departure `days` from now, truncated to whole seconds.
#[must_use]
pub fn departure_in(days: i64) -> DateTime<Utc> {
    let at = Utc::now() + Duration::days(days);
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

/// An active user with the default role.
#[must_use]
pub fn sample_user(email: &str) -> User {
    let name = email.split('@').next().unwrap_or(email).to_string();
    User::new(name, email.to_lowercase(), Utc::now())
}

/// An active user with `role`.
#[must_use]
pub fn sample_user_with_role(email: &str, role: Role) -> User {
    User {
        role,
        ..sample_user(email)
    }
}

/// A visible $397 tour starting in Banff with two departures, 30 and 90
/// days out.
#[must_use]
pub fn sample_tour(name: &str, max_group_size: u32) -> Tour {
    Tour {
        id: TourId::new(),
        name: name.to_string(),
        slug: slugify(name),
        duration: 5,
        max_group_size,
        difficulty: Difficulty::Easy,
        ratings_average: 4.5,
        ratings_quantity: 0,
        price: Money::from_dollars(397),
        price_discount: None,
        summary: "Breathtaking hike through the Canadian Banff National Park".into(),
        description: None,
        image_cover: "tour-1-cover.jpg".into(),
        images: vec!["tour-1-1.jpg".into()],
        start_location: Some(StartLocation {
            description: "Banff, CAN".into(),
            address: Some("224 Banff Ave, Banff, AB, Canada".into()),
            coordinates: Coordinates {
                lng: -115.570_154,
                lat: 51.178_456,
            },
        }),
        locations: vec![Location {
            description: "Banff National Park".into(),
            coordinates: Coordinates {
                lng: -116.214_531,
                lat: 51.417_611,
            },
            day: 1,
        }],
        guides: vec![],
        secret_tour: false,
        start_dates: vec![StartDate::new(departure_in(30)), StartDate::new(departure_in(90))],
        created_at: Utc::now(),
    }
}
