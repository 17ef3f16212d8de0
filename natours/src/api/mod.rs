//! HTTP API handlers, one module per resource.
//!
//! - [`tours`]: tour CRUD, aliases, aggregates and geo queries
//! - [`users`]: passwordless login, profile, admin user management
//! - [`reviews`]: reviews, also nested under tours
//! - [`bookings`]: checkout sessions and booking management
//! - [`refunds`]: refund requests and admin decisions
//! - [`failed_bookings`]: paid checkouts that could not be recorded
//! - [`webhook`]: provider callbacks
//!
//! [`crud`] and [`query`] hold the pieces shared by the resource modules.

pub mod bookings;
pub mod crud;
pub mod failed_bookings;
pub mod query;
pub mod refunds;
pub mod reviews;
pub mod tours;
pub mod users;
pub mod webhook;
