//! PostgreSQL booking repository.
//!
//! Every change to a departure's booked counter first locks the
//! `tour_start_dates` row with `SELECT ... FOR UPDATE`, so concurrent
//! checkouts for the same departure are serialized and the capacity check
//! always sees committed counts.

use super::{count_from_db, db_count};
use crate::models::{Booking, PaymentIntent};
use crate::payment_gateway::CompletedCheckout;
use crate::repositories::{
    BookingRepository, FinalizeOutcome, FinalizedBooking, RepositoryError, RepositoryResult,
};
use crate::types::{BookingId, Money, TourId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

const SELECT_BOOKINGS: &str = "SELECT id, tour_id, user_id, price, start_date, num_participants,
        paid, refunded, created_at
     FROM bookings";

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    tour_id: Uuid,
    user_id: Uuid,
    price: i64,
    start_date: DateTime<Utc>,
    num_participants: i32,
    paid: bool,
    refunded: bool,
    created_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self, payment_intents: Vec<PaymentIntent>) -> RepositoryResult<Booking> {
        Ok(Booking {
            id: BookingId::from_uuid(self.id),
            tour: TourId::from_uuid(self.tour_id),
            user: UserId::from_uuid(self.user_id),
            price: Money::from_cents(self.price),
            start_date: self.start_date,
            num_participants: count_from_db(self.num_participants, "bookings.num_participants")?,
            payment_intents,
            paid: self.paid,
            refunded: self.refunded,
            created_at: self.created_at,
        })
    }
}

/// Attach recorded payment intents to booking rows, keeping the row order.
async fn with_payment_intents(
    conn: &mut PgConnection,
    rows: Vec<BookingRow>,
) -> RepositoryResult<Vec<Booking>> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let intents: Vec<(Uuid, String, i64)> = sqlx::query_as(
        "SELECT booking_id, payment_intent_id, amount
         FROM booking_payment_intents
         WHERE booking_id = ANY($1)
         ORDER BY position",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_booking: HashMap<Uuid, Vec<PaymentIntent>> = HashMap::new();
    for (booking_id, id, amount) in intents {
        by_booking.entry(booking_id).or_default().push(PaymentIntent {
            id,
            amount: Money::from_cents(amount),
        });
    }

    rows.into_iter()
        .map(|row| {
            let intents = by_booking.remove(&row.id).unwrap_or_default();
            row.into_booking(intents)
        })
        .collect()
}

async fn fetch_one(conn: &mut PgConnection, id: Uuid, lock: bool) -> RepositoryResult<Option<Booking>> {
    let sql = if lock {
        format!("{SELECT_BOOKINGS} WHERE id = $1 FOR UPDATE")
    } else {
        format!("{SELECT_BOOKINGS} WHERE id = $1")
    };
    let rows = sqlx::query_as::<_, BookingRow>(&sql)
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(with_payment_intents(conn, rows).await?.into_iter().next())
}

/// Lock a departure and return `(participants_booked, max_group_size)`.
async fn lock_departure(
    conn: &mut PgConnection,
    tour: TourId,
    date: DateTime<Utc>,
) -> RepositoryResult<Option<(u32, u32)>> {
    let row: Option<(i32, i32)> = sqlx::query_as(
        "SELECT d.participants_booked, t.max_group_size
         FROM tour_start_dates d
         JOIN tours t ON t.id = d.tour_id
         WHERE d.tour_id = $1 AND d.start_date = $2
         FOR UPDATE OF d",
    )
    .bind(tour.as_uuid())
    .bind(date)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|(booked, max)| {
        Ok((
            count_from_db(booked, "tour_start_dates.participants_booked")?,
            count_from_db(max, "tours.max_group_size")?,
        ))
    })
    .transpose()
}

/// Lock the departure a booking belongs to.
///
/// Every transaction that touches both a departure and its bookings locks
/// the departure first. Returns `false` when the booking does not exist.
pub(crate) async fn lock_departure_of(conn: &mut PgConnection, booking: Uuid) -> RepositoryResult<bool> {
    let departure: Option<(Uuid, DateTime<Utc>)> =
        sqlx::query_as("SELECT tour_id, start_date FROM bookings WHERE id = $1")
            .bind(booking)
            .fetch_optional(&mut *conn)
            .await?;
    let Some((tour, start_date)) = departure else {
        return Ok(false);
    };
    sqlx::query(
        "SELECT 1 FROM tour_start_dates
         WHERE tour_id = $1 AND start_date = $2
         FOR UPDATE",
    )
    .bind(tour)
    .bind(start_date)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(true)
}

async fn missing_departure(conn: &mut PgConnection, tour: TourId) -> RepositoryResult<RepositoryError> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM tours WHERE id = $1)")
        .bind(tour.as_uuid())
        .fetch_one(&mut *conn)
        .await?;
    Ok(RepositoryError::NotFound {
        resource: if exists { "start date" } else { "tour" },
    })
}

/// Lock the departure, check capacity and add `travelers` to its counter.
async fn reserve(
    conn: &mut PgConnection,
    tour: TourId,
    date: DateTime<Utc>,
    travelers: u32,
) -> RepositoryResult<()> {
    let Some((booked, max)) = lock_departure(conn, tour, date).await? else {
        return Err(missing_departure(conn, tour).await?);
    };
    add_travelers(conn, tour, date, booked, max, travelers).await
}

async fn add_travelers(
    conn: &mut PgConnection,
    tour: TourId,
    date: DateTime<Utc>,
    booked: u32,
    max: u32,
    travelers: u32,
) -> RepositoryResult<()> {
    if u64::from(booked) + u64::from(travelers) > u64::from(max) {
        return Err(RepositoryError::CapacityExceeded {
            requested: travelers,
            available: max.saturating_sub(booked),
        });
    }
    sqlx::query(
        "UPDATE tour_start_dates
         SET participants_booked = participants_booked + $3
         WHERE tour_id = $1 AND start_date = $2",
    )
    .bind(tour.as_uuid())
    .bind(date)
    .bind(db_count(travelers))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Give `travelers` places back, never going below zero.
pub(crate) async fn release(
    conn: &mut PgConnection,
    tour: Uuid,
    date: DateTime<Utc>,
    travelers: i32,
) -> RepositoryResult<()> {
    sqlx::query(
        "UPDATE tour_start_dates
         SET participants_booked = GREATEST(participants_booked - $3, 0)
         WHERE tour_id = $1 AND start_date = $2",
    )
    .bind(tour)
    .bind(date)
    .bind(travelers)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_booking(conn: &mut PgConnection, booking: &Booking) -> RepositoryResult<()> {
    sqlx::query(
        "INSERT INTO bookings (id, tour_id, user_id, price, start_date, num_participants,
            paid, refunded, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(booking.id.as_uuid())
    .bind(booking.tour.as_uuid())
    .bind(booking.user.as_uuid())
    .bind(booking.price.cents())
    .bind(booking.start_date)
    .bind(db_count(booking.num_participants))
    .bind(booking.paid)
    .bind(booking.refunded)
    .bind(booking.created_at)
    .execute(&mut *conn)
    .await?;

    for intent in &booking.payment_intents {
        record_intent(conn, booking.id, intent).await?;
    }
    Ok(())
}

async fn record_intent(conn: &mut PgConnection, booking: BookingId, intent: &PaymentIntent) -> RepositoryResult<()> {
    sqlx::query(
        "INSERT INTO booking_payment_intents (payment_intent_id, booking_id, amount)
         VALUES ($1, $2, $3)",
    )
    .bind(&intent.id)
    .bind(booking.as_uuid())
    .bind(intent.amount.cents())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        super::conflict_on_unique(e, || format!("Payment intent {} is already recorded", intent.id))
    })?;
    Ok(())
}

async fn active_booking_id(
    conn: &mut PgConnection,
    user: UserId,
    tour: TourId,
    start_date: DateTime<Utc>,
) -> RepositoryResult<Option<Uuid>> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM bookings
         WHERE user_id = $1 AND tour_id = $2 AND start_date = $3 AND NOT refunded
         ORDER BY created_at
         LIMIT 1",
    )
    .bind(user.as_uuid())
    .bind(tour.as_uuid())
    .bind(start_date)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id,)| id))
}

/// Bookings stored in `bookings` and `booking_payment_intents`.
#[derive(Clone)]
pub struct PostgresBookingRepository {
    pool: PgPool,
}

impl PostgresBookingRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_many(&self, filter: Option<UserId>) -> RepositoryResult<Vec<Booking>> {
        let mut conn = self.pool.acquire().await?;
        let rows = match filter {
            None => {
                sqlx::query_as::<_, BookingRow>(&format!("{SELECT_BOOKINGS} ORDER BY created_at"))
                    .fetch_all(&mut *conn)
                    .await?
            },
            Some(user) => {
                sqlx::query_as::<_, BookingRow>(&format!(
                    "{SELECT_BOOKINGS} WHERE user_id = $1 ORDER BY created_at"
                ))
                .bind(user.as_uuid())
                .fetch_all(&mut *conn)
                .await?
            },
        };
        with_payment_intents(&mut conn, rows).await
    }
}

#[async_trait]
impl BookingRepository for PostgresBookingRepository {
    async fn create(&self, booking: &Booking) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await?;
        reserve(&mut tx, booking.tour, booking.start_date, booking.num_participants).await?;
        insert_booking(&mut tx, booking).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: BookingId) -> RepositoryResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        fetch_one(&mut conn, *id.as_uuid(), false).await
    }

    async fn list(&self) -> RepositoryResult<Vec<Booking>> {
        self.fetch_many(None).await
    }

    async fn list_for_user(&self, user: UserId) -> RepositoryResult<Vec<Booking>> {
        self.fetch_many(Some(user)).await
    }

    async fn find_active(
        &self,
        user: UserId,
        tour: TourId,
        start_date: DateTime<Utc>,
    ) -> RepositoryResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        match active_booking_id(&mut conn, user, tour, start_date).await? {
            Some(id) => fetch_one(&mut conn, id, false).await,
            None => Ok(None),
        }
    }

    async fn has_paid_booking(&self, user: UserId, tour: TourId) -> RepositoryResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                SELECT 1 FROM bookings
                WHERE user_id = $1 AND tour_id = $2 AND paid AND NOT refunded
             )",
        )
        .bind(user.as_uuid())
        .bind(tour.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn update(&self, booking: &Booking) -> RepositoryResult<bool> {
        let result = sqlx::query("UPDATE bookings SET price = $2, paid = $3 WHERE id = $1")
            .bind(booking.id.as_uuid())
            .bind(booking.price.cents())
            .bind(booking.paid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: BookingId) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !lock_departure_of(&mut tx, *id.as_uuid()).await? {
            return Ok(false);
        }
        let removed: Option<(Uuid, DateTime<Utc>, i32, bool)> = sqlx::query_as(
            "DELETE FROM bookings WHERE id = $1
             RETURNING tour_id, start_date, num_participants, refunded",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((tour, start_date, travelers, refunded)) = removed else {
            return Ok(false);
        };
        if !refunded {
            release(&mut tx, tour, start_date, travelers).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn finalize_checkout(
        &self,
        checkout: &CompletedCheckout,
        now: DateTime<Utc>,
    ) -> RepositoryResult<FinalizedBooking> {
        let meta = &checkout.metadata;
        let mut tx = self.pool.begin().await?;

        // Redeliveries of one intent always target the same departure, so
        // this lock also serializes them.
        let departure = lock_departure(&mut tx, meta.tour, meta.start_date).await?;

        let recorded: Option<(Uuid,)> = sqlx::query_as(
            "SELECT booking_id FROM booking_payment_intents WHERE payment_intent_id = $1",
        )
        .bind(&checkout.payment_intent)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((booking_id,)) = recorded {
            let booking = fetch_one(&mut tx, booking_id, false)
                .await?
                .ok_or(RepositoryError::NotFound { resource: "booking" })?;
            tx.commit().await?;
            return Ok(FinalizedBooking {
                outcome: FinalizeOutcome::AlreadyRecorded,
                booking,
            });
        }

        if meta.num_participants == 0 {
            return Err(RepositoryError::InvalidState("no travelers in checkout".into()));
        }

        let target = match meta.booking {
            Some(id) => {
                let booking = fetch_one(&mut tx, *id.as_uuid(), true)
                    .await?
                    .ok_or(RepositoryError::NotFound { resource: "booking" })?;
                if booking.user != meta.user
                    || booking.tour != meta.tour
                    || booking.start_date != meta.start_date
                {
                    return Err(RepositoryError::InvalidState(
                        "checkout does not match the booking".into(),
                    ));
                }
                if booking.refunded {
                    return Err(RepositoryError::InvalidState("booking was refunded".into()));
                }
                Some(booking)
            },
            None => match active_booking_id(&mut tx, meta.user, meta.tour, meta.start_date).await? {
                Some(id) => fetch_one(&mut tx, id, true).await?,
                None => None,
            },
        };

        let Some((booked, max)) = departure else {
            return Err(missing_departure(&mut tx, meta.tour).await?);
        };
        add_travelers(&mut tx, meta.tour, meta.start_date, booked, max, meta.num_participants).await?;

        let intent = PaymentIntent {
            id: checkout.payment_intent.clone(),
            amount: checkout.amount_total,
        };

        let finalized = match target {
            Some(mut booking) => {
                let price = booking
                    .price
                    .checked_add(checkout.amount_total)
                    .ok_or_else(|| RepositoryError::InvalidState("booking price overflow".into()))?;
                booking.num_participants += meta.num_participants;
                booking.price = price;
                sqlx::query("UPDATE bookings SET num_participants = $2, price = $3 WHERE id = $1")
                    .bind(booking.id.as_uuid())
                    .bind(db_count(booking.num_participants))
                    .bind(price.cents())
                    .execute(&mut *tx)
                    .await?;
                record_intent(&mut tx, booking.id, &intent).await?;
                booking.payment_intents.push(intent);
                FinalizedBooking {
                    outcome: FinalizeOutcome::TravelersAdded,
                    booking,
                }
            },
            None => {
                let booking = Booking {
                    id: BookingId::new(),
                    tour: meta.tour,
                    user: meta.user,
                    price: checkout.amount_total,
                    start_date: meta.start_date,
                    num_participants: meta.num_participants,
                    payment_intents: vec![intent],
                    paid: true,
                    refunded: false,
                    created_at: now,
                };
                insert_booking(&mut tx, &booking).await?;
                FinalizedBooking {
                    outcome: FinalizeOutcome::Created,
                    booking,
                }
            },
        };

        tx.commit().await?;
        Ok(finalized)
    }
}
