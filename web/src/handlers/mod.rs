//! HTTP request handlers shared by every Natours deployment.

pub mod health;

pub use health::{health_check, readiness_response};
