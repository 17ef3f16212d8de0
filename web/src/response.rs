//! Success envelope for JSON responses.
//!
//! Every successful API response has the shape
//! `{"status":"success","results":n,"data":...}`, with `results` present only
//! for list endpoints. Deletes answer `204 No Content` with no body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// A successful API response.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    results: Option<usize>,
    data: Option<T>,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<usize>,
    data: &'a T,
}

impl<T: Serialize> ApiResponse<T> {
    /// `200 OK` with a single document.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            results: None,
            data: Some(data),
        }
    }

    /// `201 Created` with the new document.
    #[must_use]
    pub const fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            results: None,
            data: Some(data),
        }
    }

    /// `204 No Content`.
    #[must_use]
    pub const fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            results: None,
            data: None,
        }
    }

    /// HTTP status the response will carry.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Payload, absent for `204` responses.
    #[must_use]
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    /// `200 OK` with a list and its length as `results`.
    #[must_use]
    pub fn list(items: Vec<T>) -> Self {
        Self {
            status: StatusCode::OK,
            results: Some(items.len()),
            data: Some(items),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self.data {
            Some(data) => (
                self.status,
                Json(Envelope {
                    status: "success",
                    results: self.results,
                    data: &data,
                }),
            )
                .into_response(),
            None => self.status.into_response(),
        }
    }
}
