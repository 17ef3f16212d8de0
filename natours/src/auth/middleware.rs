//! Authentication extractors.
//!
//! - [`BearerToken`]: raw `Authorization: Bearer <token>` value
//! - [`AuthUser`]: the active user behind a live session
//! - [`RequireAdmin`]: an [`AuthUser`] with the admin role
//!
//! # Usage
//!
//! ```rust,ignore
//! async fn get_me(auth: AuthUser) -> ApiResponse<User> {
//!     ApiResponse::ok(auth.user)
//! }
//!
//! async fn list_failed_bookings(
//!     State(state): State<AppState>,
//!     _admin: RequireAdmin,
//! ) -> Result<ApiResponse<Vec<FailedBooking>>, AppError> { ... }
//! ```

use super::tokens::hash_token;
use crate::models::User;
use crate::server::state::AppState;
use crate::types::Role;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use natours_web::error::AppError;

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                AppError::unauthorized("You are not logged in! Please log in to get access.")
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| {
                AppError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
            })?
            .trim();

        if token.is_empty() {
            return Err(AppError::unauthorized("Empty bearer token"));
        }

        Ok(Self(token.to_string()))
    }
}

/// The authenticated user.
///
/// Resolves the bearer token to a live session and loads its (active)
/// user. Use this as a handler parameter to require authentication.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The user behind the session
    pub user: User,
    /// Hash of the session token (for logout)
    pub token_hash: String,
}

impl AuthUser {
    /// Fail with 403 unless the user has one of `roles`.
    ///
    /// # Errors
    ///
    /// Returns a forbidden [`AppError`] when the role does not match.
    pub fn require_role(&self, roles: &[Role]) -> Result<(), AppError> {
        if self.user.has_any_role(roles) {
            Ok(())
        } else {
            Err(AppError::forbidden(
                "You do not have permission to perform this action",
            ))
        }
    }

    /// Whether the user is an admin.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let bearer = BearerToken::from_request_parts(parts, state).await?;
        let token_hash = hash_token(&bearer.0);

        let user_id = state
            .repositories
            .sessions
            .find_session(&token_hash, state.clock.now())
            .await?
            .ok_or_else(|| {
                AppError::unauthorized("Your session has expired or is invalid. Please log in again.")
            })?;

        let user = state.repositories.users.find(user_id).await?.ok_or_else(|| {
            AppError::unauthorized("The user belonging to this session no longer exists.")
        })?;

        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        Ok(Self { user, token_hash })
    }
}

/// Require admin role.
///
/// Returns 401 without a session and 403 for any other role.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        auth.require_role(&[Role::Admin])?;
        Ok(Self(auth))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;

    async fn bearer(header: Option<&str>) -> Result<BearerToken, AppError> {
        let mut builder = Request::builder().uri("/api/v1/users/me");
        if let Some(value) = header {
            builder = builder.header("authorization", value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        BearerToken::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_bearer_token_parsing() {
        let token = bearer(Some("Bearer abc123")).await.unwrap();
        assert_eq!(token.0, "abc123");
    }

    #[tokio::test]
    async fn test_invalid_bearer_format() {
        assert_eq!(
            bearer(Some("Basic dXNlcjpwYXNz")).await.unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(bearer(Some("Bearer  ")).await.unwrap_err().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(bearer(None).await.unwrap_err().status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_role_check() {
        let mut user = User::new("Leo".into(), "leo@example.com".into(), Utc::now());
        user.role = Role::LeadGuide;
        let auth = AuthUser {
            user,
            token_hash: String::new(),
        };
        assert!(auth.require_role(&[Role::Admin, Role::LeadGuide]).is_ok());
        assert_eq!(
            auth.require_role(&[Role::Admin]).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
        assert!(!auth.is_admin());
    }
}
