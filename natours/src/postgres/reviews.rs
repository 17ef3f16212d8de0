//! PostgreSQL review repository.
//!
//! Each write recomputes the tour's rating in the same transaction.

use super::{conflict_on_unique, db_count};
use crate::models::Review;
use crate::repositories::{RepositoryError, RepositoryResult, ReviewRepository};
use crate::types::{RatingsSummary, ReviewId, TourId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    review: String,
    rating: i16,
    tour_id: Uuid,
    user_id: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReviewRow> for Review {
    type Error = RepositoryError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ReviewId::from_uuid(row.id),
            review: row.review,
            rating: u8::try_from(row.rating)
                .map_err(|_| RepositoryError::Corrupt(format!("reviews.rating out of range: {}", row.rating)))?,
            tour: TourId::from_uuid(row.tour_id),
            user: UserId::from_uuid(row.user_id),
            created_at: row.created_at,
        })
    }
}

pub(super) async fn recompute_ratings(conn: &mut PgConnection, tour: Uuid) -> RepositoryResult<RatingsSummary> {
    let ratings: Vec<(i16,)> = sqlx::query_as("SELECT rating FROM reviews WHERE tour_id = $1")
        .bind(tour)
        .fetch_all(&mut *conn)
        .await?;
    let ratings: Vec<u8> = ratings
        .into_iter()
        .filter_map(|(rating,)| u8::try_from(rating).ok())
        .collect();
    let summary = RatingsSummary::from_ratings(&ratings);

    sqlx::query("UPDATE tours SET ratings_average = $2, ratings_quantity = $3 WHERE id = $1")
        .bind(tour)
        .bind(summary.average)
        .bind(db_count(summary.quantity))
        .execute(&mut *conn)
        .await?;
    Ok(summary)
}

/// Reviews stored in the `reviews` table.
#[derive(Clone)]
pub struct PostgresReviewRepository {
    pool: PgPool,
}

impl PostgresReviewRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewRepository for PostgresReviewRepository {
    async fn insert(&self, review: &Review) -> RepositoryResult<RatingsSummary> {
        let mut tx = self.pool.begin().await?;

        let tour: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM tours WHERE id = $1 FOR UPDATE")
            .bind(review.tour.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        let (tour,) = tour.ok_or(RepositoryError::NotFound { resource: "tour" })?;

        sqlx::query(
            "INSERT INTO reviews (id, review, rating, tour_id, user_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(review.id.as_uuid())
        .bind(&review.review)
        .bind(i16::from(review.rating))
        .bind(tour)
        .bind(review.user.as_uuid())
        .bind(review.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || "You have already reviewed this tour".into()))?;

        let summary = recompute_ratings(&mut tx, tour).await?;
        tx.commit().await?;
        Ok(summary)
    }

    async fn find(&self, id: ReviewId) -> RepositoryResult<Option<Review>> {
        sqlx::query_as::<_, ReviewRow>(
            "SELECT id, review, rating, tour_id, user_id, created_at FROM reviews WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Review::try_from)
        .transpose()
    }

    async fn list(&self, tour: Option<TourId>) -> RepositoryResult<Vec<Review>> {
        sqlx::query_as::<_, ReviewRow>(
            "SELECT id, review, rating, tour_id, user_id, created_at
             FROM reviews
             WHERE $1::uuid IS NULL OR tour_id = $1
             ORDER BY created_at",
        )
        .bind(tour.map(|t| *t.as_uuid()))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Review::try_from)
        .collect()
    }

    async fn update(&self, review: &Review) -> RepositoryResult<Option<RatingsSummary>> {
        let mut tx = self.pool.begin().await?;
        let tour: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE reviews SET review = $2, rating = $3 WHERE id = $1 RETURNING tour_id",
        )
        .bind(review.id.as_uuid())
        .bind(&review.review)
        .bind(i16::from(review.rating))
        .fetch_optional(&mut *tx)
        .await?;
        let Some((tour,)) = tour else {
            return Ok(None);
        };

        let summary = recompute_ratings(&mut tx, tour).await?;
        tx.commit().await?;
        Ok(Some(summary))
    }

    async fn delete(&self, id: ReviewId) -> RepositoryResult<Option<RatingsSummary>> {
        let mut tx = self.pool.begin().await?;
        let tour: Option<(Uuid,)> = sqlx::query_as("DELETE FROM reviews WHERE id = $1 RETURNING tour_id")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        let Some((tour,)) = tour else {
            return Ok(None);
        };

        let summary = recompute_ratings(&mut tx, tour).await?;
        tx.commit().await?;
        Ok(Some(summary))
    }
}
