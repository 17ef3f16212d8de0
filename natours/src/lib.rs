//! Natours - a tour booking API built on the Composable Rust architecture
//!
//! Travelers browse tours, sign in with magic links, pay for departures
//! through hosted Stripe checkout and review the tours they booked.
//! Operators manage tours, bookings and refund requests.
//!
//! # Architecture
//!
//! ```text
//!  HTTP (axum)                 Workflows (Store + Reducer)        Persistence
//! ┌──────────────┐  actions   ┌────────────────────────┐  traits ┌──────────────┐
//! │  api::*      │──────────▶│  CheckoutReducer       │────────▶│ Repositories │
//! │  handlers    │◀──────────│  RefundReducer         │         │ (Postgres or │
//! └──────────────┘  terminal  └────────────────────────┘         │  in-memory)  │
//!        │          action             │ effects                 └──────────────┘
//!        │                             ▼
//!        │                    PaymentGateway, EmailProvider
//!        └── CRUD reads/writes go straight to the repositories
//! ```
//!
//! # Booking lifecycle
//!
//! 1. `POST /bookings/checkout-session` validates the departure and opens a
//!    checkout session. Nothing is reserved yet.
//! 2. The provider calls `POST /webhook-checkout` once payment succeeds.
//! 3. The booking is written in one transaction that locks the departure,
//!    re-checks capacity and records the payment intent. A checkout that
//!    cannot be written is kept as a failed booking for an operator.
//! 4. A refund request moves `pending → processed | rejected`; processing
//!    refunds every payment intent and releases the places.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod api;
pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod models;
pub mod payment_gateway;
pub mod postgres;
pub mod repositories;
pub mod server;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use config::Config;
pub use error::{NatoursError, Result};
pub use server::{build_router, AppState};
pub use types::*;
