//! In-memory implementations for tests and local development.
//!
//! [`InMemoryDatabase`] implements every repository trait over one mutex,
//! so each trait method is trivially atomic. [`RecordingEmailProvider`]
//! keeps sent emails for assertions.

pub mod database;
pub mod email;
pub mod fixtures;

pub use database::InMemoryDatabase;
pub use email::RecordingEmailProvider;
pub use crate::payment_gateway::MockPaymentGateway;
