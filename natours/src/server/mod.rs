//! HTTP server module for Natours.
//!
//! This module provides the Axum-based HTTP server with:
//! - Application state management
//! - Readiness endpoint
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use health::readiness_check;
pub use routes::build_router;
pub use state::AppState;
