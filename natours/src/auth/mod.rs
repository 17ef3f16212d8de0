//! Passwordless authentication.
//!
//! A login request emails a single-use magic link; verifying its token opens
//! a session whose bearer token authenticates every later request. Only
//! SHA-256 hashes of either token are stored.

pub mod middleware;
pub mod tokens;

pub use middleware::{AuthUser, BearerToken, RequireAdmin};
pub use tokens::{generate_token, hash_token};
