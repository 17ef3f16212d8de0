//! Review endpoints.
//!
//! Writing a review recomputes the tour's rating inside the repository, so
//! handlers only validate and check ownership.

use super::crud::{self, Resource, ANY_ROLE};
use crate::error::{NatoursError, Result};
use crate::models::{Review, User};
use crate::server::state::AppState;
use crate::types::{ReviewId, Role, TourId};
use async_trait::async_trait;
use axum::Router;
use serde::Deserialize;

/// Body of `POST /reviews` and `POST /tours/:id/reviews`.
#[derive(Debug, Deserialize)]
pub struct CreateReview {
    /// Review text
    pub review: String,
    /// 1 to 5
    pub rating: u8,
    /// Reviewed tour (from the path on nested routes)
    #[serde(default)]
    pub tour: Option<TourId>,
}

/// Body of `PATCH /reviews/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateReview {
    /// Review text
    pub review: Option<String>,
    /// 1 to 5
    pub rating: Option<u8>,
}

fn validate_review(review: &Review) -> Result<()> {
    if review.review.trim().is_empty() {
        return Err(NatoursError::Validation("Review can not be empty!".into()));
    }
    if !(1..=5).contains(&review.rating) {
        return Err(NatoursError::Validation("Rating must be between 1 and 5".into()));
    }
    Ok(())
}

fn check_author(review: &Review, actor: &User) -> Result<()> {
    if review.user == actor.id || actor.role == Role::Admin {
        Ok(())
    } else {
        Err(NatoursError::Forbidden(
            "You can only change your own reviews".into(),
        ))
    }
}

/// Validate and store a review by `actor`.
///
/// # Errors
///
/// - Validation errors for missing tour, empty text or a rating outside 1 to 5
/// - Not found for an unknown tour
/// - Forbidden without a paid booking for the tour
/// - Conflict for a second review of the same tour
pub async fn create_review(state: &AppState, actor: &User, input: CreateReview) -> Result<Review> {
    let tour_id = input
        .tour
        .ok_or_else(|| NatoursError::Validation("Review must belong to a tour".into()))?;
    let review = Review {
        id: ReviewId::new(),
        review: input.review.trim().to_string(),
        rating: input.rating,
        tour: tour_id,
        user: actor.id,
        created_at: state.clock.now(),
    };
    validate_review(&review)?;

    if state.repositories.tours.find(tour_id).await?.is_none() {
        return Err(NatoursError::not_found("Tour", tour_id));
    }
    if !state
        .repositories
        .bookings
        .has_paid_booking(actor.id, tour_id)
        .await?
    {
        return Err(NatoursError::Forbidden(
            "You can only review tours you have booked".into(),
        ));
    }

    let ratings = state.repositories.reviews.insert(&review).await?;
    tracing::info!(
        review_id = %review.id,
        tour_id = %tour_id,
        ratings_average = ratings.average,
        ratings_quantity = ratings.quantity,
        "Review created"
    );
    Ok(review)
}

#[async_trait]
impl Resource for Review {
    type Id = ReviewId;
    type Create = CreateReview;
    type Update = UpdateReview;

    const NAME: &'static str = "Review";
    const FIELDS: &'static [&'static str] = &["id", "review", "rating", "tour", "user", "created_at"];
    const CREATE_ROLES: &'static [Role] = &[Role::User];
    const WRITE_ROLES: &'static [Role] = ANY_ROLE;

    async fn list(state: &AppState) -> Result<Vec<Self>> {
        Ok(state.repositories.reviews.list(None).await?)
    }

    async fn find(state: &AppState, id: ReviewId) -> Result<Option<Self>> {
        Ok(state.repositories.reviews.find(id).await?)
    }

    async fn create(state: &AppState, actor: &User, input: CreateReview) -> Result<Self> {
        create_review(state, actor, input).await
    }

    async fn update(
        state: &AppState,
        actor: &User,
        id: ReviewId,
        input: UpdateReview,
    ) -> Result<Option<Self>> {
        let Some(mut review) = state.repositories.reviews.find(id).await? else {
            return Ok(None);
        };
        check_author(&review, actor)?;

        if let Some(text) = input.review {
            review.review = text.trim().to_string();
        }
        if let Some(rating) = input.rating {
            review.rating = rating;
        }
        validate_review(&review)?;

        Ok(state
            .repositories
            .reviews
            .update(&review)
            .await?
            .map(|_| review))
    }

    async fn delete(state: &AppState, actor: &User, id: ReviewId) -> Result<bool> {
        let Some(review) = state.repositories.reviews.find(id).await? else {
            return Ok(false);
        };
        check_author(&review, actor)?;
        Ok(state.repositories.reviews.delete(id).await?.is_some())
    }
}

/// Routes mounted at `/api/v1/reviews`.
pub fn routes() -> Router<AppState> {
    crud::crud_routes::<Review>()
}
