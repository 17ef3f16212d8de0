//! User endpoints: passwordless sign-in, self service and admin CRUD.
//!
//! - POST /api/v1/users/signup
//! - POST /api/v1/users/login - email a magic link
//! - POST /api/v1/users/login/verify - exchange the link token for a session
//! - POST /api/v1/users/logout
//! - GET /api/v1/users/me, PATCH /update-me, DELETE /delete-me
//! - admin: GET /users, GET|PATCH|DELETE /users/:id

use super::crud::{self, Resource};
use crate::auth::{generate_token, hash_token, AuthUser};
use crate::error::{NatoursError, Result};
use crate::models::User;
use crate::server::state::AppState;
use crate::types::{Role, UserId};
use async_trait::async_trait;
use axum::{
    extract::State,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use natours_web::{ApiResponse, AppError, ClientIp, UserAgent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lower-case and check an email address.
///
/// # Errors
///
/// Validation error for anything without a local part and a dotted domain.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        });
    if valid {
        Ok(email)
    } else {
        Err(NatoursError::Validation("Please provide a valid email".into()))
    }
}

fn normalize_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        Err(NatoursError::Validation("Please tell us your name!".into()))
    } else {
        Ok(name.to_string())
    }
}

// ============================================================================
// Sign-in
// ============================================================================

/// Body of `POST /users/signup`.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// `POST /users/signup`: create the account and send a welcome email.
///
/// # Errors
///
/// 422 for invalid input, 409 when the email is taken.
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> std::result::Result<ApiResponse<User>, AppError> {
    let user = User::new(
        normalize_name(&request.name)?,
        normalize_email(&request.email)?,
        state.clock.now(),
    );
    state
        .repositories
        .users
        .insert(&user)
        .await
        .map_err(NatoursError::from)?;
    tracing::info!(user_id = %user.id, "User signed up");

    let account_url = format!("{}/me", state.config.server.public_base_url);
    if let Err(e) = state.email.send_welcome(&user.email, &user.name, &account_url).await {
        tracing::warn!(user_id = %user.id, error = %e, "Welcome email failed");
    }
    Ok(ApiResponse::created(user))
}

/// Body of `POST /users/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email address
    pub email: String,
}

/// Answer to `POST /users/login`.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Human readable outcome
    pub message: String,
    /// The link token, only when exposing links for testing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

const LOGIN_SENT: &str = "If that email is registered, a login link is on its way";

/// `POST /users/login`: email a single-use magic link.
///
/// Answers the same for unknown addresses.
///
/// # Errors
///
/// 422 for a malformed address, 500 when the email cannot be sent.
pub async fn login(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> std::result::Result<ApiResponse<LoginResponse>, AppError> {
    let email = normalize_email(&request.email)?;
    let Some(user) = state
        .repositories
        .users
        .find_by_email(&email)
        .await
        .map_err(NatoursError::from)?
    else {
        tracing::debug!(client_ip = %client_ip, "Login requested for unknown email");
        return Ok(ApiResponse::ok(LoginResponse {
            message: LOGIN_SENT.into(),
            token: None,
        }));
    };

    let token = generate_token();
    let expires_at = state.clock.now() + Duration::seconds(state.config.auth.magic_link_ttl);
    state
        .repositories
        .sessions
        .store_login_token(&hash_token(&token), user.id, expires_at)
        .await
        .map_err(NatoursError::from)?;

    let link = format!("{}/login/verify?token={token}", state.config.server.public_base_url);
    state
        .email
        .send_magic_link(&user.email, &link, expires_at)
        .await
        .map_err(NatoursError::from)?;
    tracing::info!(user_id = %user.id, client_ip = %client_ip, "Magic link sent");

    Ok(ApiResponse::ok(LoginResponse {
        message: LOGIN_SENT.into(),
        token: state.config.auth.expose_magic_links_for_testing.then_some(token),
    }))
}

/// Body of `POST /users/login/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// Token from the magic link
    pub token: String,
}

/// An opened session.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Bearer token for later requests
    pub token: String,
    /// When the session ends
    pub expires_at: DateTime<Utc>,
    /// Signed-in user
    pub user: User,
}

/// `POST /users/login/verify`: consume the link token and open a session.
///
/// # Errors
///
/// 401 for an unknown, used or expired token.
pub async fn verify_login(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    user_agent: UserAgent,
    Json(request): Json<VerifyRequest>,
) -> std::result::Result<ApiResponse<SessionResponse>, AppError> {
    let invalid = || AppError::unauthorized("Login link is invalid or has expired");
    let now = state.clock.now();

    let user_id = state
        .repositories
        .sessions
        .consume_login_token(&hash_token(request.token.trim()), now)
        .await
        .map_err(NatoursError::from)?
        .ok_or_else(invalid)?;
    let user = state
        .repositories
        .users
        .find(user_id)
        .await
        .map_err(NatoursError::from)?
        .ok_or_else(invalid)?;

    let token = generate_token();
    let expires_at = now + Duration::seconds(state.config.auth.session_ttl);
    state
        .repositories
        .sessions
        .create_session(&hash_token(&token), user.id, expires_at)
        .await
        .map_err(NatoursError::from)?;
    tracing::info!(
        user_id = %user.id,
        client_ip = %client_ip,
        user_agent = user_agent.as_str(),
        "Session opened"
    );

    Ok(ApiResponse::ok(SessionResponse {
        token,
        expires_at,
        user,
    }))
}

/// `POST /users/logout`: revoke the current session.
///
/// # Errors
///
/// 401 without a session.
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> std::result::Result<ApiResponse<()>, AppError> {
    state
        .repositories
        .sessions
        .revoke_session(&auth.token_hash)
        .await
        .map_err(NatoursError::from)?;
    Ok(ApiResponse::no_content())
}

// ============================================================================
// Self service
// ============================================================================

/// `GET /users/me`
pub async fn get_me(auth: AuthUser) -> ApiResponse<User> {
    ApiResponse::ok(auth.user)
}

/// Body of `PATCH /users/update-me`.
#[derive(Debug, Deserialize)]
pub struct UpdateMeRequest {
    /// Display name
    pub name: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Photo file name
    pub photo: Option<String>,
    /// Anything else, which is refused
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

/// `PATCH /users/update-me`: name, email and photo only.
///
/// # Errors
///
/// 400 for any other field, 422 for invalid values, 409 for a taken email.
pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<UpdateMeRequest>,
) -> std::result::Result<ApiResponse<User>, AppError> {
    if !request.other.is_empty() {
        let fields: Vec<&str> = request.other.keys().map(String::as_str).collect();
        return Err(AppError::bad_request(format!(
            "This route only updates name, email and photo (got {})",
            fields.join(", ")
        )));
    }

    let mut user = auth.user;
    if let Some(name) = request.name {
        user.name = normalize_name(&name)?;
    }
    if let Some(email) = request.email {
        user.email = normalize_email(&email)?;
    }
    if let Some(photo) = request.photo {
        user.photo = photo;
    }
    state
        .repositories
        .users
        .update(&user)
        .await
        .map_err(NatoursError::from)?;
    Ok(ApiResponse::ok(user))
}

/// `DELETE /users/delete-me`: deactivate the account and end its sessions.
///
/// # Errors
///
/// 401 without a session.
pub async fn delete_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> std::result::Result<ApiResponse<()>, AppError> {
    let mut user = auth.user;
    user.active = false;
    state
        .repositories
        .users
        .update(&user)
        .await
        .map_err(NatoursError::from)?;
    state
        .repositories
        .sessions
        .revoke_user_sessions(user.id)
        .await
        .map_err(NatoursError::from)?;
    tracing::info!(user_id = %user.id, "User deactivated");
    Ok(ApiResponse::no_content())
}

// ============================================================================
// Admin CRUD
// ============================================================================

/// Body of `PATCH /users/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUser {
    /// Display name
    pub name: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Photo file name
    pub photo: Option<String>,
    /// Role
    pub role: Option<Role>,
}

#[async_trait]
impl Resource for User {
    type Id = UserId;
    type Create = SignupRequest;
    type Update = UpdateUser;

    const NAME: &'static str = "User";
    const FIELDS: &'static [&'static str] = &["id", "name", "email", "photo", "role", "created_at"];
    const READ_ROLES: Option<&'static [Role]> = Some(&[Role::Admin]);
    const CREATE_ROLES: &'static [Role] = &[Role::Admin];
    const WRITE_ROLES: &'static [Role] = &[Role::Admin];

    async fn list(state: &AppState) -> Result<Vec<Self>> {
        Ok(state.repositories.users.list().await?)
    }

    async fn find(state: &AppState, id: UserId) -> Result<Option<Self>> {
        Ok(state.repositories.users.find(id).await?)
    }

    async fn create(_state: &AppState, _actor: &User, _input: SignupRequest) -> Result<Self> {
        Err(NatoursError::BadRequest(
            "This route is not defined! Please use /users/signup instead".into(),
        ))
    }

    async fn update(
        state: &AppState,
        _actor: &User,
        id: UserId,
        input: UpdateUser,
    ) -> Result<Option<Self>> {
        let Some(mut user) = state.repositories.users.find(id).await? else {
            return Ok(None);
        };
        if let Some(name) = input.name {
            user.name = normalize_name(&name)?;
        }
        if let Some(email) = input.email {
            user.email = normalize_email(&email)?;
        }
        if let Some(photo) = input.photo {
            user.photo = photo;
        }
        if let Some(role) = input.role {
            user.role = role;
        }
        Ok(state.repositories.users.update(&user).await?.then_some(user))
    }

    async fn delete(state: &AppState, _actor: &User, id: UserId) -> Result<bool> {
        Ok(state.repositories.users.delete(id).await?)
    }
}

/// Routes mounted at `/api/v1/users`.
pub fn routes() -> Router<AppState> {
    crud::crud_routes::<User>()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/login/verify", post(verify_login))
        .route("/logout", post(logout))
        .route("/me", get(get_me))
        .route("/update-me", patch(update_me))
        .route("/delete-me", delete(delete_me))
}
