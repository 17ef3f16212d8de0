//! PostgreSQL tour repository.
//!
//! A tour is one `tours` row plus its `tour_start_dates` rows. The start
//! location and itinerary are JSONB documents.

use super::{conflict_on_unique, corrupt, count_from_db, db_count};
use crate::models::Tour;
use crate::repositories::{group_too_small, RepositoryError, RepositoryResult, TourRepository};
use crate::types::{Difficulty, Location, Money, StartDate, StartLocation, TourId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

const SELECT_TOURS: &str = "SELECT id, name, slug, duration, max_group_size, difficulty,
        ratings_average, ratings_quantity, price, price_discount, summary, description,
        image_cover, images, start_location, locations, guides, secret_tour, created_at
     FROM tours";

#[derive(sqlx::FromRow)]
struct TourRow {
    id: Uuid,
    name: String,
    slug: String,
    duration: i32,
    max_group_size: i32,
    difficulty: String,
    ratings_average: f64,
    ratings_quantity: i32,
    price: i64,
    price_discount: Option<i64>,
    summary: String,
    description: Option<String>,
    image_cover: String,
    images: Vec<String>,
    start_location: Option<Json<StartLocation>>,
    locations: Json<Vec<Location>>,
    guides: Vec<Uuid>,
    secret_tour: bool,
    created_at: DateTime<Utc>,
}

impl TourRow {
    fn into_tour(self, start_dates: Vec<StartDate>) -> RepositoryResult<Tour> {
        Ok(Tour {
            id: TourId::from_uuid(self.id),
            name: self.name,
            slug: self.slug,
            duration: count_from_db(self.duration, "tours.duration")?,
            max_group_size: count_from_db(self.max_group_size, "tours.max_group_size")?,
            difficulty: self
                .difficulty
                .parse::<Difficulty>()
                .map_err(|e| corrupt("tours.difficulty", e))?,
            ratings_average: self.ratings_average,
            ratings_quantity: count_from_db(self.ratings_quantity, "tours.ratings_quantity")?,
            price: Money::from_cents(self.price),
            price_discount: self.price_discount.map(Money::from_cents),
            summary: self.summary,
            description: self.description,
            image_cover: self.image_cover,
            images: self.images,
            start_location: self.start_location.map(|json| json.0),
            locations: self.locations.0,
            guides: self.guides.into_iter().map(UserId::from_uuid).collect(),
            secret_tour: self.secret_tour,
            start_dates,
            created_at: self.created_at,
        })
    }
}

/// Attach departures to tour rows, keeping the row order.
async fn with_start_dates(conn: &mut PgConnection, rows: Vec<TourRow>) -> RepositoryResult<Vec<Tour>> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let dates: Vec<(Uuid, DateTime<Utc>, i32)> = sqlx::query_as(
        "SELECT tour_id, start_date, participants_booked
         FROM tour_start_dates
         WHERE tour_id = ANY($1)
         ORDER BY start_date",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_tour: HashMap<Uuid, Vec<StartDate>> = HashMap::new();
    for (tour_id, date, booked) in dates {
        by_tour.entry(tour_id).or_default().push(StartDate {
            date,
            participants_booked: count_from_db(booked, "tour_start_dates.participants_booked")?,
        });
    }

    rows.into_iter()
        .map(|row| {
            let dates = by_tour.remove(&row.id).unwrap_or_default();
            row.into_tour(dates)
        })
        .collect()
}

async fn insert_start_dates(conn: &mut PgConnection, tour: &Tour) -> RepositoryResult<()> {
    for date in &tour.start_dates {
        sqlx::query(
            "INSERT INTO tour_start_dates (tour_id, start_date, participants_booked)
             VALUES ($1, $2, 0)
             ON CONFLICT (tour_id, start_date) DO NOTHING",
        )
        .bind(tour.id.as_uuid())
        .bind(date.date)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn name_taken(tour: &Tour) -> impl FnOnce() -> String + '_ {
    move || format!("A tour named {} already exists", tour.name)
}

/// Tours stored in `tours` and `tour_start_dates`.
#[derive(Clone)]
pub struct PostgresTourRepository {
    pool: PgPool,
}

impl PostgresTourRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_visible(&self, filter: TourFilter<'_>) -> RepositoryResult<Vec<Tour>> {
        let mut conn = self.pool.acquire().await?;
        let rows = match filter {
            TourFilter::All => {
                sqlx::query_as::<_, TourRow>(&format!(
                    "{SELECT_TOURS} WHERE NOT secret_tour ORDER BY created_at"
                ))
                .fetch_all(&mut *conn)
                .await?
            },
            TourFilter::Id(id) => {
                sqlx::query_as::<_, TourRow>(&format!(
                    "{SELECT_TOURS} WHERE NOT secret_tour AND id = $1"
                ))
                .bind(id.as_uuid())
                .fetch_all(&mut *conn)
                .await?
            },
            TourFilter::Slug(slug) => {
                sqlx::query_as::<_, TourRow>(&format!(
                    "{SELECT_TOURS} WHERE NOT secret_tour AND slug = $1"
                ))
                .bind(slug)
                .fetch_all(&mut *conn)
                .await?
            },
        };
        with_start_dates(&mut conn, rows).await
    }
}

enum TourFilter<'a> {
    All,
    Id(TourId),
    Slug(&'a str),
}

#[async_trait]
impl TourRepository for PostgresTourRepository {
    async fn insert(&self, tour: &Tour) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO tours (id, name, slug, duration, max_group_size, difficulty,
                ratings_average, ratings_quantity, price, price_discount, summary, description,
                image_cover, images, start_location, locations, guides, secret_tour, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
        )
        .bind(tour.id.as_uuid())
        .bind(&tour.name)
        .bind(&tour.slug)
        .bind(db_count(tour.duration))
        .bind(db_count(tour.max_group_size))
        .bind(tour.difficulty.as_str())
        .bind(tour.ratings_average)
        .bind(db_count(tour.ratings_quantity))
        .bind(tour.price.cents())
        .bind(tour.price_discount.map(|m| m.cents()))
        .bind(&tour.summary)
        .bind(&tour.description)
        .bind(&tour.image_cover)
        .bind(&tour.images)
        .bind(tour.start_location.as_ref().map(Json))
        .bind(Json(&tour.locations))
        .bind(tour.guides.iter().map(|g| *g.as_uuid()).collect::<Vec<Uuid>>())
        .bind(tour.secret_tour)
        .bind(tour.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, name_taken(tour)))?;

        insert_start_dates(&mut tx, tour).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: TourId) -> RepositoryResult<Option<Tour>> {
        Ok(self
            .fetch_visible(TourFilter::Id(id))
            .await?
            .into_iter()
            .next())
    }

    async fn find_by_slug(&self, slug: &str) -> RepositoryResult<Option<Tour>> {
        Ok(self
            .fetch_visible(TourFilter::Slug(slug))
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self) -> RepositoryResult<Vec<Tour>> {
        self.fetch_visible(TourFilter::All).await
    }

    async fn update(&self, tour: &Tour) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM tours WHERE id = $1 FOR NO KEY UPDATE")
            .bind(tour.id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(false);
        }

        let booked: Vec<(DateTime<Utc>, i32)> = sqlx::query_as(
            "SELECT start_date, participants_booked FROM tour_start_dates
             WHERE tour_id = $1 AND participants_booked > 0
             ORDER BY start_date
             FOR UPDATE",
        )
        .bind(tour.id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;
        for (date, participants) in &booked {
            let participants = count_from_db(*participants, "tour_start_dates.participants_booked")?;
            if tour.start_date(*date).is_none() {
                return Err(RepositoryError::InvalidState(format!(
                    "Departure {} already has travelers",
                    date.to_rfc3339()
                )));
            }
            if participants > tour.max_group_size {
                return Err(group_too_small(tour.max_group_size, *date, participants));
            }
        }

        sqlx::query(
            "UPDATE tours
             SET name = $2, slug = $3, duration = $4, max_group_size = $5, difficulty = $6,
                 price = $7, price_discount = $8, summary = $9, description = $10,
                 image_cover = $11, images = $12, start_location = $13, locations = $14,
                 guides = $15, secret_tour = $16
             WHERE id = $1",
        )
        .bind(tour.id.as_uuid())
        .bind(&tour.name)
        .bind(&tour.slug)
        .bind(db_count(tour.duration))
        .bind(db_count(tour.max_group_size))
        .bind(tour.difficulty.as_str())
        .bind(tour.price.cents())
        .bind(tour.price_discount.map(|m| m.cents()))
        .bind(&tour.summary)
        .bind(&tour.description)
        .bind(&tour.image_cover)
        .bind(&tour.images)
        .bind(tour.start_location.as_ref().map(Json))
        .bind(Json(&tour.locations))
        .bind(tour.guides.iter().map(|g| *g.as_uuid()).collect::<Vec<Uuid>>())
        .bind(tour.secret_tour)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, name_taken(tour)))?;

        let scheduled: Vec<DateTime<Utc>> = tour.start_dates.iter().map(|d| d.date).collect();
        sqlx::query("DELETE FROM tour_start_dates WHERE tour_id = $1 AND NOT (start_date = ANY($2))")
            .bind(tour.id.as_uuid())
            .bind(&scheduled)
            .execute(&mut *tx)
            .await?;
        insert_start_dates(&mut tx, tour).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, id: TourId) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM tours WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
