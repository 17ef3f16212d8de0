//! PostgreSQL refund repository.
//!
//! Status changes lock the refund row, so two admins deciding the same
//! request cannot both succeed.

use super::bookings::{lock_departure_of, release};
use super::{conflict_on_unique, corrupt};
use crate::models::Refund;
use crate::repositories::{RefundRepository, RepositoryError, RepositoryResult};
use crate::types::{BookingId, Money, RefundId, RefundStatus, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const SELECT_REFUNDS: &str = "SELECT id, booking_id, user_id, amount, status, requested_at,
        processed_at, provider_refund_id
     FROM refunds";

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    booking_id: Uuid,
    user_id: Uuid,
    amount: i64,
    status: String,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    provider_refund_id: Option<String>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = RepositoryError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: RefundId::from_uuid(row.id),
            booking: BookingId::from_uuid(row.booking_id),
            user: UserId::from_uuid(row.user_id),
            amount: Money::from_cents(row.amount),
            status: row
                .status
                .parse::<RefundStatus>()
                .map_err(|e| corrupt("refunds.status", e))?,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
            provider_refund_id: row.provider_refund_id,
        })
    }
}

/// Lock a refund and check that it may move to `to`.
async fn lock_for_transition(
    conn: &mut PgConnection,
    id: RefundId,
    to: RefundStatus,
) -> RepositoryResult<Refund> {
    let row = sqlx::query_as::<_, RefundRow>(&format!("{SELECT_REFUNDS} WHERE id = $1 FOR UPDATE"))
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(RepositoryError::NotFound { resource: "refund" })?;
    let refund = Refund::try_from(row)?;
    refund
        .status
        .transition(to)
        .map_err(|e| RepositoryError::InvalidState(e.to_string()))?;
    Ok(refund)
}

/// Refunds stored in the `refunds` table.
#[derive(Clone)]
pub struct PostgresRefundRepository {
    pool: PgPool,
}

impl PostgresRefundRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefundRepository for PostgresRefundRepository {
    async fn insert(&self, refund: &Refund) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO refunds (id, booking_id, user_id, amount, status, requested_at,
                processed_at, provider_refund_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(refund.id.as_uuid())
        .bind(refund.booking.as_uuid())
        .bind(refund.user.as_uuid())
        .bind(refund.amount.cents())
        .bind(refund.status.as_str())
        .bind(refund.requested_at)
        .bind(refund.processed_at)
        .bind(&refund.provider_refund_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || "A refund was already requested for this booking".into())
        })?;
        Ok(())
    }

    async fn find(&self, id: RefundId) -> RepositoryResult<Option<Refund>> {
        sqlx::query_as::<_, RefundRow>(&format!("{SELECT_REFUNDS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Refund::try_from)
            .transpose()
    }

    async fn find_for_booking(&self, booking: BookingId) -> RepositoryResult<Option<Refund>> {
        sqlx::query_as::<_, RefundRow>(&format!(
            "{SELECT_REFUNDS} WHERE booking_id = $1 ORDER BY requested_at LIMIT 1"
        ))
        .bind(booking.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Refund::try_from)
        .transpose()
    }

    async fn list(&self) -> RepositoryResult<Vec<Refund>> {
        sqlx::query_as::<_, RefundRow>(&format!("{SELECT_REFUNDS} ORDER BY requested_at"))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Refund::try_from)
            .collect()
    }

    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Refund>> {
        sqlx::query_as::<_, RefundRow>(&format!(
            "{SELECT_REFUNDS} WHERE user_id = $1 ORDER BY requested_at"
        ))
        .bind(user.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Refund::try_from)
        .collect()
    }

    async fn reject(&self, id: RefundId, at: DateTime<Utc>) -> RepositoryResult<Refund> {
        let mut tx = self.pool.begin().await?;
        let mut refund = lock_for_transition(&mut tx, id, RefundStatus::Rejected).await?;

        sqlx::query("UPDATE refunds SET status = $2, processed_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(RefundStatus::Rejected.as_str())
            .bind(at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        refund.status = RefundStatus::Rejected;
        refund.processed_at = Some(at);
        Ok(refund)
    }

    async fn complete(
        &self,
        id: RefundId,
        provider_refund_id: &str,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Refund> {
        let mut tx = self.pool.begin().await?;
        let mut refund = lock_for_transition(&mut tx, id, RefundStatus::Processed).await?;
        lock_departure_of(&mut tx, *refund.booking.as_uuid()).await?;

        let booking: Option<(Uuid, DateTime<Utc>, i32, bool)> = sqlx::query_as(
            "SELECT tour_id, start_date, num_participants, refunded
             FROM bookings
             WHERE id = $1
             FOR UPDATE",
        )
        .bind(refund.booking.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let (tour, start_date, travelers, refunded) =
            booking.ok_or(RepositoryError::NotFound { resource: "booking" })?;
        if refunded {
            return Err(RepositoryError::InvalidState("booking was already refunded".into()));
        }

        sqlx::query("UPDATE bookings SET refunded = TRUE WHERE id = $1")
            .bind(refund.booking.as_uuid())
            .execute(&mut *tx)
            .await?;
        release(&mut tx, tour, start_date, travelers).await?;

        sqlx::query(
            "UPDATE refunds SET status = $2, processed_at = $3, provider_refund_id = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(RefundStatus::Processed.as_str())
        .bind(at)
        .bind(provider_refund_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        refund.status = RefundStatus::Processed;
        refund.processed_at = Some(at);
        refund.provider_refund_id = Some(provider_refund_id.to_string());
        Ok(refund)
    }
}
