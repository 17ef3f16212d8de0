//! Generic CRUD handlers.
//!
//! A type implementing [`Resource`] gets list, read, create, update and
//! delete endpoints from [`crud_routes`], with role checks and the list
//! query features applied uniformly.
//!
//! ```rust,ignore
//! Router::new().nest("/tours", crud_routes::<Tour>())
//! ```

use super::query::QueryFeatures;
use crate::auth::AuthUser;
use crate::error::{NatoursError, Result};
use crate::models::User;
use crate::server::state::AppState;
use crate::types::Role;
use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use natours_web::{ApiResponse, AppError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Display;

/// Every role, for resources any signed-in user may touch.
pub const ANY_ROLE: &[Role] = &[Role::User, Role::Guide, Role::LeadGuide, Role::Admin];

/// A document type served by the generic handlers.
#[async_trait]
pub trait Resource: Serialize + Send + Sync + Sized + 'static {
    /// Identifier parsed from the path
    type Id: DeserializeOwned + Display + Copy + Send + Sync + 'static;
    /// Body accepted by `POST`
    type Create: DeserializeOwned + Send + 'static;
    /// Body accepted by `PATCH`
    type Update: DeserializeOwned + Send + 'static;

    /// Name used in messages ("Tour")
    const NAME: &'static str;
    /// Fields that may be filtered, sorted and projected
    const FIELDS: &'static [&'static str];
    /// Roles allowed to read; `None` makes reads public
    const READ_ROLES: Option<&'static [Role]> = None;
    /// Roles allowed to create
    const CREATE_ROLES: &'static [Role];
    /// Roles allowed to update and delete
    const WRITE_ROLES: &'static [Role];

    /// Every visible document
    async fn list(state: &AppState) -> Result<Vec<Self>>;

    /// One document
    async fn find(state: &AppState, id: Self::Id) -> Result<Option<Self>>;

    /// Validate and store a new document
    async fn create(state: &AppState, actor: &User, input: Self::Create) -> Result<Self>;

    /// Apply changes; `None` when the document does not exist
    async fn update(
        state: &AppState,
        actor: &User,
        id: Self::Id,
        input: Self::Update,
    ) -> Result<Option<Self>>;

    /// Remove; `false` when the document does not exist
    async fn delete(state: &AppState, actor: &User, id: Self::Id) -> Result<bool>;
}

/// Check read access for `R`.
///
/// # Errors
///
/// 401 without a session when reads are restricted, 403 for the wrong role.
pub fn authorize_read<R: Resource>(auth: Option<&AuthUser>) -> std::result::Result<(), AppError> {
    match R::READ_ROLES {
        None => Ok(()),
        Some(roles) => auth
            .ok_or_else(|| {
                AppError::unauthorized("You are not logged in! Please log in to get access.")
            })?
            .require_role(roles),
    }
}

/// Serialize documents and run the list query over them.
///
/// # Errors
///
/// 400 for an invalid query, 500 when a document fails to serialize.
pub fn query_documents<T: Serialize>(
    documents: Vec<T>,
    fields: &[&str],
    params: &[(String, String)],
) -> std::result::Result<Vec<Value>, AppError> {
    let features = QueryFeatures::parse(params, fields).map_err(|e| AppError::bad_request(e.to_string()))?;
    let documents = documents
        .into_iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| NatoursError::Internal(e.to_string()))?;
    Ok(features.apply(documents))
}

/// `GET /` for any resource.
///
/// # Errors
///
/// Access, query and repository errors as [`AppError`].
pub async fn get_all<R: Resource>(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Query(params): Query<Vec<(String, String)>>,
) -> std::result::Result<ApiResponse<Vec<Value>>, AppError> {
    authorize_read::<R>(auth.as_ref())?;
    let documents = R::list(&state).await?;
    Ok(ApiResponse::list(query_documents(documents, R::FIELDS, &params)?))
}

/// `GET /:id` for any resource.
///
/// # Errors
///
/// 404 when the document does not exist.
pub async fn get_one<R: Resource>(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Path(id): Path<R::Id>,
) -> std::result::Result<ApiResponse<R>, AppError> {
    authorize_read::<R>(auth.as_ref())?;
    let document = R::find(&state, id)
        .await?
        .ok_or_else(|| NatoursError::not_found(R::NAME, id))?;
    Ok(ApiResponse::ok(document))
}

/// `POST /` for any resource.
///
/// # Errors
///
/// Access, validation and conflict errors as [`AppError`].
pub async fn create_one<R: Resource>(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(input): Json<R::Create>,
) -> std::result::Result<ApiResponse<R>, AppError> {
    auth.require_role(R::CREATE_ROLES)?;
    let document = R::create(&state, &auth.user, input).await?;
    Ok(ApiResponse::created(document))
}

/// `PATCH /:id` for any resource.
///
/// # Errors
///
/// Access and validation errors, 404 when the document does not exist.
pub async fn update_one<R: Resource>(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<R::Id>,
    Json(input): Json<R::Update>,
) -> std::result::Result<ApiResponse<R>, AppError> {
    auth.require_role(R::WRITE_ROLES)?;
    let document = R::update(&state, &auth.user, id, input)
        .await?
        .ok_or_else(|| NatoursError::not_found(R::NAME, id))?;
    Ok(ApiResponse::ok(document))
}

/// `DELETE /:id` for any resource.
///
/// # Errors
///
/// Access errors, 404 when the document does not exist.
pub async fn delete_one<R: Resource>(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<R::Id>,
) -> std::result::Result<ApiResponse<()>, AppError> {
    auth.require_role(R::WRITE_ROLES)?;
    if R::delete(&state, &auth.user, id).await? {
        Ok(ApiResponse::no_content())
    } else {
        Err(NatoursError::not_found(R::NAME, id).into())
    }
}

/// The five handlers mounted at `/` and `/:id`.
pub fn crud_routes<R: Resource>() -> Router<AppState> {
    Router::new()
        .route("/", get(get_all::<R>).post(create_one::<R>))
        .route(
            "/:id",
            get(get_one::<R>)
                .patch(update_one::<R>)
                .delete(delete_one::<R>),
        )
}
