//! PostgreSQL failed booking repository.

use super::{count_from_db, db_count};
use crate::models::FailedBooking;
use crate::repositories::{FailedBookingRepository, RepositoryError, RepositoryResult};
use crate::types::{FailedBookingId, Money, TourId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct FailedBookingRow {
    id: Uuid,
    session_id: String,
    tour_id: Uuid,
    user_id: Uuid,
    start_date: DateTime<Utc>,
    num_participants: i32,
    amount: i64,
    payment_intent: String,
    error: String,
    resolved: bool,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<FailedBookingRow> for FailedBooking {
    type Error = RepositoryError;

    fn try_from(row: FailedBookingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: FailedBookingId::from_uuid(row.id),
            session_id: row.session_id,
            tour: TourId::from_uuid(row.tour_id),
            user: UserId::from_uuid(row.user_id),
            start_date: row.start_date,
            num_participants: count_from_db(row.num_participants, "failed_bookings.num_participants")?,
            amount: Money::from_cents(row.amount),
            payment_intent: row.payment_intent,
            error: row.error,
            resolved: row.resolved,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

/// Records stored in the `failed_bookings` table.
#[derive(Clone)]
pub struct PostgresFailedBookingRepository {
    pool: PgPool,
}

impl PostgresFailedBookingRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailedBookingRepository for PostgresFailedBookingRepository {
    async fn record(&self, failed: &FailedBooking) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO failed_bookings (id, session_id, tour_id, user_id, start_date,
                num_participants, amount, payment_intent, error, resolved, created_at, resolved_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(failed.id.as_uuid())
        .bind(&failed.session_id)
        .bind(failed.tour.as_uuid())
        .bind(failed.user.as_uuid())
        .bind(failed.start_date)
        .bind(db_count(failed.num_participants))
        .bind(failed.amount.cents())
        .bind(&failed.payment_intent)
        .bind(&failed.error)
        .bind(failed.resolved)
        .bind(failed.created_at)
        .bind(failed.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> RepositoryResult<Vec<FailedBooking>> {
        sqlx::query_as::<_, FailedBookingRow>(
            "SELECT id, session_id, tour_id, user_id, start_date, num_participants, amount,
                payment_intent, error, resolved, created_at, resolved_at
             FROM failed_bookings
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(FailedBooking::try_from)
        .collect()
    }

    async fn resolve(
        &self,
        id: FailedBookingId,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<FailedBooking>> {
        sqlx::query_as::<_, FailedBookingRow>(
            "UPDATE failed_bookings
             SET resolved = TRUE, resolved_at = $2
             WHERE id = $1
             RETURNING id, session_id, tour_id, user_id, start_date, num_participants, amount,
                payment_intent, error, resolved, created_at, resolved_at",
        )
        .bind(id.as_uuid())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .map(FailedBooking::try_from)
        .transpose()
    }
}
