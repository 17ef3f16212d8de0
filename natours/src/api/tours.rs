//! Tour endpoints.
//!
//! CRUD comes from [`super::crud`]; this module adds the aliases,
//! aggregations and geo queries:
//! - GET /api/v1/tours/top-5-cheap
//! - GET /api/v1/tours/tour-stats
//! - GET /api/v1/tours/monthly-plan/:year
//! - GET /api/v1/tours/tours-within/:distance/center/:latlng/unit/:unit
//! - GET /api/v1/tours/distances/:latlng/unit/:unit
//! - GET /api/v1/tours/slug/:slug
//! - GET|POST /api/v1/tours/:id/reviews

use super::crud::{self, query_documents, Resource};
use super::reviews::{create_review, CreateReview};
use crate::auth::AuthUser;
use crate::error::{NatoursError, Result};
use crate::models::{slugify, Review, Tour, User};
use crate::server::state::AppState;
use crate::types::{
    Coordinates, Difficulty, DistanceUnit, Location, Money, Role, StartDate, StartLocation, TourId,
    UserId,
};
use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Datelike, Utc};
use natours_web::{ApiResponse, AppError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const NAME_LENGTH: std::ops::RangeInclusive<usize> = 10..=40;

/// Roles that manage tours
const TOUR_MANAGERS: &[Role] = &[Role::Admin, Role::LeadGuide];

// ============================================================================
// Documents
// ============================================================================

/// Places left on one departure.
#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    /// Departure
    pub date: DateTime<Utc>,
    /// Places left
    pub available_places: u32,
    /// No places left
    pub sold_out: bool,
}

/// A tour as returned by the API, with its derived fields.
#[derive(Debug, Clone, Serialize)]
pub struct TourDocument {
    /// Stored tour
    #[serde(flatten)]
    pub tour: Tour,
    /// Duration in weeks
    pub duration_weeks: f64,
    /// Availability per departure
    pub availability: Vec<Availability>,
}

impl From<Tour> for TourDocument {
    fn from(tour: Tour) -> Self {
        let availability = tour
            .start_dates
            .iter()
            .map(|d| Availability {
                date: d.date,
                available_places: d.available_places(tour.max_group_size),
                sold_out: d.sold_out(tour.max_group_size),
            })
            .collect();
        Self {
            duration_weeks: tour.duration_weeks(),
            availability,
            tour,
        }
    }
}

/// Body of `POST /tours`.
#[derive(Debug, Deserialize)]
pub struct CreateTour {
    /// Unique name
    pub name: String,
    /// Days
    pub duration: u32,
    /// Places per departure
    pub max_group_size: u32,
    /// Difficulty
    pub difficulty: Difficulty,
    /// Price per traveler in cents
    pub price: Money,
    /// Discounted price
    #[serde(default)]
    pub price_discount: Option<Money>,
    /// Short summary
    pub summary: String,
    /// Long description
    #[serde(default)]
    pub description: Option<String>,
    /// Cover image file name
    pub image_cover: String,
    /// Gallery
    #[serde(default)]
    pub images: Vec<String>,
    /// Starting point
    #[serde(default)]
    pub start_location: Option<StartLocation>,
    /// Itinerary
    #[serde(default)]
    pub locations: Vec<Location>,
    /// Guides
    #[serde(default)]
    pub guides: Vec<UserId>,
    /// Hidden from every listing
    #[serde(default)]
    pub secret_tour: bool,
    /// Departures
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
}

/// Body of `PATCH /tours/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTour {
    /// Unique name
    pub name: Option<String>,
    /// Days
    pub duration: Option<u32>,
    /// Places per departure
    pub max_group_size: Option<u32>,
    /// Difficulty
    pub difficulty: Option<Difficulty>,
    /// Price per traveler
    pub price: Option<Money>,
    /// Discounted price
    pub price_discount: Option<Money>,
    /// Short summary
    pub summary: Option<String>,
    /// Long description
    pub description: Option<String>,
    /// Cover image file name
    pub image_cover: Option<String>,
    /// Gallery
    pub images: Option<Vec<String>>,
    /// Starting point
    pub start_location: Option<StartLocation>,
    /// Itinerary
    pub locations: Option<Vec<Location>>,
    /// Guides
    pub guides: Option<Vec<UserId>>,
    /// Hidden from every listing
    pub secret_tour: Option<bool>,
    /// Departures; booked counts of kept dates are preserved
    pub start_dates: Option<Vec<DateTime<Utc>>>,
}

fn validate_tour(tour: &Tour) -> Result<()> {
    let invalid = |msg: &str| Err(NatoursError::Validation(msg.to_string()));
    if !NAME_LENGTH.contains(&tour.name.chars().count()) {
        return invalid("A tour name must have between 10 and 40 characters");
    }
    if tour.duration == 0 {
        return invalid("A tour must have a duration");
    }
    if tour.max_group_size == 0 {
        return invalid("A tour must have a group size");
    }
    if !tour.price.is_positive() {
        return invalid("A tour must have a price");
    }
    if let Some(discount) = tour.price_discount {
        if !discount.is_positive() || discount >= tour.price {
            return invalid("Discount price should be below the regular price");
        }
    }
    if tour.summary.trim().is_empty() {
        return invalid("A tour must have a summary");
    }
    if tour.image_cover.trim().is_empty() {
        return invalid("A tour must have a cover image");
    }
    let mut dates: Vec<_> = tour.start_dates.iter().map(|d| d.date).collect();
    dates.sort_unstable();
    if dates.windows(2).any(|w| w[0] == w[1]) {
        return invalid("Start dates must be unique");
    }
    Ok(())
}

async fn check_guides(state: &AppState, guides: &[UserId]) -> Result<()> {
    for id in guides {
        let guide = state.repositories.users.find(*id).await?;
        if !guide.is_some_and(|g| g.has_any_role(&[Role::Guide, Role::LeadGuide])) {
            return Err(NatoursError::Validation(format!("No guide found with id {id}")));
        }
    }
    Ok(())
}

#[async_trait]
impl Resource for TourDocument {
    type Id = TourId;
    type Create = CreateTour;
    type Update = UpdateTour;

    const NAME: &'static str = "Tour";
    const FIELDS: &'static [&'static str] = &[
        "id",
        "name",
        "slug",
        "duration",
        "duration_weeks",
        "max_group_size",
        "difficulty",
        "ratings_average",
        "ratings_quantity",
        "price",
        "price_discount",
        "summary",
        "description",
        "image_cover",
        "images",
        "start_location",
        "locations",
        "guides",
        "start_dates",
        "availability",
        "created_at",
    ];
    const CREATE_ROLES: &'static [Role] = TOUR_MANAGERS;
    const WRITE_ROLES: &'static [Role] = TOUR_MANAGERS;

    async fn list(state: &AppState) -> Result<Vec<Self>> {
        let tours = state.repositories.tours.list().await?;
        Ok(tours.into_iter().map(Self::from).collect())
    }

    async fn find(state: &AppState, id: TourId) -> Result<Option<Self>> {
        Ok(state.repositories.tours.find(id).await?.map(Self::from))
    }

    async fn create(state: &AppState, _actor: &User, input: CreateTour) -> Result<Self> {
        let name = input.name.trim().to_string();
        let tour = Tour {
            id: TourId::new(),
            slug: slugify(&name),
            name,
            duration: input.duration,
            max_group_size: input.max_group_size,
            difficulty: input.difficulty,
            ratings_average: crate::types::RatingsSummary::DEFAULT_AVERAGE,
            ratings_quantity: 0,
            price: input.price,
            price_discount: input.price_discount,
            summary: input.summary.trim().to_string(),
            description: input.description.map(|d| d.trim().to_string()),
            image_cover: input.image_cover,
            images: input.images,
            start_location: input.start_location,
            locations: input.locations,
            guides: input.guides,
            secret_tour: input.secret_tour,
            start_dates: input.start_dates.into_iter().map(StartDate::new).collect(),
            created_at: state.clock.now(),
        };
        validate_tour(&tour)?;
        check_guides(state, &tour.guides).await?;
        state.repositories.tours.insert(&tour).await?;
        tracing::info!(tour_id = %tour.id, name = %tour.name, "Tour created");
        Ok(tour.into())
    }

    async fn update(
        state: &AppState,
        _actor: &User,
        id: TourId,
        input: UpdateTour,
    ) -> Result<Option<Self>> {
        let Some(mut tour) = state.repositories.tours.find(id).await? else {
            return Ok(None);
        };

        if let Some(name) = input.name {
            tour.name = name.trim().to_string();
            tour.slug = slugify(&tour.name);
        }
        if let Some(duration) = input.duration {
            tour.duration = duration;
        }
        if let Some(size) = input.max_group_size {
            tour.max_group_size = size;
        }
        if let Some(difficulty) = input.difficulty {
            tour.difficulty = difficulty;
        }
        if let Some(price) = input.price {
            tour.price = price;
        }
        if input.price_discount.is_some() {
            tour.price_discount = input.price_discount;
        }
        if let Some(summary) = input.summary {
            tour.summary = summary.trim().to_string();
        }
        if input.description.is_some() {
            tour.description = input.description;
        }
        if let Some(cover) = input.image_cover {
            tour.image_cover = cover;
        }
        if let Some(images) = input.images {
            tour.images = images;
        }
        if input.start_location.is_some() {
            tour.start_location = input.start_location;
        }
        if let Some(locations) = input.locations {
            tour.locations = locations;
        }
        if let Some(guides) = input.guides {
            check_guides(state, &guides).await?;
            tour.guides = guides;
        }
        if let Some(secret) = input.secret_tour {
            tour.secret_tour = secret;
        }
        if let Some(dates) = input.start_dates {
            tour.start_dates = dates
                .into_iter()
                .map(|date| tour.start_date(date).cloned().unwrap_or_else(|| StartDate::new(date)))
                .collect();
        }

        validate_tour(&tour)?;
        if !state.repositories.tours.update(&tour).await? {
            return Ok(None);
        }
        Ok(state.repositories.tours.find(id).await?.map(Self::from))
    }

    async fn delete(state: &AppState, _actor: &User, id: TourId) -> Result<bool> {
        Ok(state.repositories.tours.delete(id).await?)
    }
}

// ============================================================================
// Aliases and aggregations
// ============================================================================

/// `GET /tours/top-5-cheap`: best rated, then cheapest.
///
/// # Errors
///
/// 400 for an invalid query.
pub async fn top_five_cheap(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> std::result::Result<ApiResponse<Vec<Value>>, AppError> {
    let mut query: Vec<(String, String)> = [
        ("limit", "5"),
        ("sort", "-ratings_average,price"),
        ("fields", "name,price,ratings_average,summary,difficulty"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    query.extend(params);

    let tours = TourDocument::list(&state).await?;
    Ok(ApiResponse::list(query_documents(
        tours,
        TourDocument::FIELDS,
        &query,
    )?))
}

/// Statistics for one difficulty level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifficultyStats {
    /// Difficulty
    pub difficulty: Difficulty,
    /// Tours in the group
    pub num_tours: u32,
    /// Sum of review counts
    pub num_ratings: u32,
    /// Mean rating
    pub avg_rating: f64,
    /// Mean price in cents
    pub avg_price: f64,
    /// Cheapest
    pub min_price: Money,
    /// Most expensive
    pub max_price: Money,
}

/// Group well rated tours (≥ 4.5) by difficulty, cheapest group first.
#[must_use]
pub fn tour_stats_for(tours: &[Tour]) -> Vec<DifficultyStats> {
    let mut groups: BTreeMap<Difficulty, Vec<&Tour>> = BTreeMap::new();
    for tour in tours.iter().filter(|t| t.ratings_average >= 4.5) {
        groups.entry(tour.difficulty).or_default().push(tour);
    }

    let mut stats: Vec<DifficultyStats> = groups
        .into_iter()
        .filter_map(|(difficulty, group)| {
            let min_price = group.iter().map(|t| t.price).min()?;
            let max_price = group.iter().map(|t| t.price).max()?;
            #[allow(clippy::cast_precision_loss)]
            let count = group.len() as f64;
            #[allow(clippy::cast_precision_loss)]
            let avg_price = group.iter().map(|t| t.price.cents() as f64).sum::<f64>() / count;
            Some(DifficultyStats {
                difficulty,
                num_tours: u32::try_from(group.len()).unwrap_or(u32::MAX),
                num_ratings: group.iter().map(|t| t.ratings_quantity).sum(),
                avg_rating: group.iter().map(|t| t.ratings_average).sum::<f64>() / count,
                avg_price,
                min_price,
                max_price,
            })
        })
        .collect();
    stats.sort_by(|a, b| a.avg_price.total_cmp(&b.avg_price));
    stats
}

/// `GET /tours/tour-stats`
///
/// # Errors
///
/// Repository failures.
pub async fn tour_stats(
    State(state): State<AppState>,
) -> std::result::Result<ApiResponse<Vec<DifficultyStats>>, AppError> {
    let tours = state.repositories.tours.list().await.map_err(NatoursError::from)?;
    Ok(ApiResponse::list(tour_stats_for(&tours)))
}

/// Departures in one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthPlan {
    /// Month number, 1 to 12
    pub month: u32,
    /// Departures that month
    pub num_tour_starts: u32,
    /// Tours departing
    pub tours: Vec<String>,
}

/// Departures of `year` grouped by month, busiest month first.
#[must_use]
pub fn monthly_plan_for(tours: &[Tour], year: i32) -> Vec<MonthPlan> {
    let mut months: BTreeMap<u32, MonthPlan> = BTreeMap::new();
    for tour in tours {
        for start in tour.start_dates.iter().filter(|d| d.date.year() == year) {
            let plan = months.entry(start.date.month()).or_insert_with(|| MonthPlan {
                month: start.date.month(),
                num_tour_starts: 0,
                tours: Vec::new(),
            });
            plan.num_tour_starts += 1;
            plan.tours.push(tour.name.clone());
        }
    }

    let mut plan: Vec<MonthPlan> = months.into_values().collect();
    plan.sort_by(|a, b| b.num_tour_starts.cmp(&a.num_tour_starts).then(a.month.cmp(&b.month)));
    plan.truncate(12);
    plan
}

/// `GET /tours/monthly-plan/:year` (admin, lead guide, guide)
///
/// # Errors
///
/// 403 for travelers.
pub async fn monthly_plan(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(year): Path<i32>,
) -> std::result::Result<ApiResponse<Vec<MonthPlan>>, AppError> {
    auth.require_role(&[Role::Admin, Role::LeadGuide, Role::Guide])?;
    let tours = state.repositories.tours.list().await.map_err(NatoursError::from)?;
    Ok(ApiResponse::list(monthly_plan_for(&tours, year)))
}

// ============================================================================
// Geo queries
// ============================================================================

fn parse_geo(latlng: &str, unit: &str) -> std::result::Result<(Coordinates, DistanceUnit), AppError> {
    let center = Coordinates::parse_lat_lng(latlng).map_err(AppError::bad_request)?;
    let unit = unit
        .parse::<DistanceUnit>()
        .map_err(|_| AppError::bad_request("Unit must be 'mi' or 'km'"))?;
    Ok((center, unit))
}

/// `GET /tours/tours-within/:distance/center/:latlng/unit/:unit`
///
/// # Errors
///
/// 400 for malformed coordinates, distance or unit.
pub async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> std::result::Result<ApiResponse<Vec<TourDocument>>, AppError> {
    let (center, unit) = parse_geo(&latlng, &unit)?;
    let distance: f64 = distance
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| AppError::bad_request("Distance must be a positive number"))?;
    let radius = distance * unit.metres();

    let tours = state.repositories.tours.list().await.map_err(NatoursError::from)?;
    let within = tours
        .into_iter()
        .filter(|t| t.distance_from(&center).is_some_and(|d| d <= radius))
        .map(TourDocument::from)
        .collect();
    Ok(ApiResponse::list(within))
}

/// Distance from a point to a tour's start.
#[derive(Debug, Clone, Serialize)]
pub struct TourDistance {
    /// Tour
    pub id: TourId,
    /// Tour name
    pub name: String,
    /// Distance in the requested unit
    pub distance: f64,
}

/// `GET /tours/distances/:latlng/unit/:unit`, nearest first.
///
/// # Errors
///
/// 400 for malformed coordinates or unit.
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> std::result::Result<ApiResponse<Vec<TourDistance>>, AppError> {
    let (center, unit) = parse_geo(&latlng, &unit)?;
    let tours = state.repositories.tours.list().await.map_err(NatoursError::from)?;

    let mut distances: Vec<TourDistance> = tours
        .into_iter()
        .filter_map(|t| {
            let metres = t.distance_from(&center)?;
            Some(TourDistance {
                id: t.id,
                name: t.name,
                distance: metres / unit.metres(),
            })
        })
        .collect();
    distances.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    Ok(ApiResponse::list(distances))
}

/// `GET /tours/slug/:slug`
///
/// # Errors
///
/// 404 for an unknown slug.
pub async fn get_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> std::result::Result<ApiResponse<TourDocument>, AppError> {
    let tour = state
        .repositories
        .tours
        .find_by_slug(&slug)
        .await
        .map_err(NatoursError::from)?
        .ok_or_else(|| NatoursError::not_found("Tour", &slug))?;
    Ok(ApiResponse::ok(tour.into()))
}

// ============================================================================
// Nested reviews
// ============================================================================

/// `GET /tours/:id/reviews`
///
/// # Errors
///
/// 400 for an invalid query.
pub async fn list_tour_reviews(
    State(state): State<AppState>,
    Path(tour_id): Path<TourId>,
    Query(params): Query<Vec<(String, String)>>,
) -> std::result::Result<ApiResponse<Vec<Value>>, AppError> {
    let reviews = state
        .repositories
        .reviews
        .list(Some(tour_id))
        .await
        .map_err(NatoursError::from)?;
    Ok(ApiResponse::list(query_documents(reviews, Review::FIELDS, &params)?))
}

/// `POST /tours/:id/reviews`: the tour comes from the path.
///
/// # Errors
///
/// Same as `POST /reviews`.
pub async fn create_tour_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(tour_id): Path<TourId>,
    Json(mut input): Json<CreateReview>,
) -> std::result::Result<ApiResponse<Review>, AppError> {
    auth.require_role(Review::CREATE_ROLES)?;
    input.tour = Some(tour_id);
    let review = create_review(&state, &auth.user, input).await?;
    Ok(ApiResponse::created(review))
}

/// Routes mounted at `/api/v1/tours`.
pub fn routes() -> Router<AppState> {
    crud::crud_routes::<TourDocument>()
        .route("/top-5-cheap", get(top_five_cheap))
        .route("/tour-stats", get(tour_stats))
        .route("/monthly-plan/:year", get(monthly_plan))
        .route(
            "/tours-within/:distance/center/:latlng/unit/:unit",
            get(tours_within),
        )
        .route("/distances/:latlng/unit/:unit", get(distances))
        .route("/slug/:slug", get(get_by_slug))
        .route("/:id/reviews", get(list_tour_reviews).post(create_tour_review))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::mocks::fixtures::sample_tour;
    use chrono::TimeZone;

    fn tour(name: &str, difficulty: Difficulty, price: i64, rating: f64) -> Tour {
        let mut tour = sample_tour(name, 10);
        tour.difficulty = difficulty;
        tour.price = Money::from_dollars(price);
        tour.ratings_average = rating;
        tour.ratings_quantity = 2;
        tour
    }

    #[test]
    fn test_stats_group_well_rated_tours_by_difficulty() {
        let tours = vec![
            tour("The Forest Hiker", Difficulty::Easy, 400, 4.8),
            tour("The Park Camper", Difficulty::Easy, 200, 4.6),
            tour("The Snow Adventurer", Difficulty::Difficult, 1000, 4.5),
            tour("The Wine Taster", Difficulty::Medium, 100, 4.0),
        ];
        let stats = tour_stats_for(&tours);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].difficulty, Difficulty::Easy);
        assert_eq!(stats[0].num_tours, 2);
        assert_eq!(stats[0].num_ratings, 4);
        assert_eq!(stats[0].avg_price, 30_000.0);
        assert_eq!(stats[0].min_price, Money::from_dollars(200));
        assert_eq!(stats[1].difficulty, Difficulty::Difficult);
    }

    #[test]
    fn test_monthly_plan_orders_busiest_month_first() {
        let at = |m| Utc.with_ymd_and_hms(2026, m, 10, 9, 0, 0).unwrap();
        let mut hiker = sample_tour("The Forest Hiker", 10);
        hiker.start_dates = vec![StartDate::new(at(3)), StartDate::new(at(7))];
        let mut explorer = sample_tour("The Sea Explorer", 10);
        explorer.start_dates = vec![
            StartDate::new(at(7)),
            StartDate::new(Utc.with_ymd_and_hms(2027, 7, 1, 9, 0, 0).unwrap()),
        ];

        let plan = monthly_plan_for(&[hiker, explorer], 2026);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].month, 7);
        assert_eq!(plan[0].num_tour_starts, 2);
        assert_eq!(plan[0].tours, vec!["The Forest Hiker", "The Sea Explorer"]);
        assert_eq!(plan[1].month, 3);
    }

    #[test]
    fn test_validation() {
        let valid = sample_tour("The Forest Hiker", 10);
        assert!(validate_tour(&valid).is_ok());

        let short = Tour {
            name: "Short".into(),
            ..valid.clone()
        };
        assert!(matches!(validate_tour(&short), Err(NatoursError::Validation(_))));

        let discounted = Tour {
            price_discount: Some(valid.price),
            ..valid.clone()
        };
        assert!(matches!(validate_tour(&discounted), Err(NatoursError::Validation(_))));

        let mut duplicated = valid.clone();
        duplicated.start_dates.push(valid.start_dates[0].clone());
        assert!(matches!(validate_tour(&duplicated), Err(NatoursError::Validation(_))));
    }

    #[test]
    fn test_document_exposes_availability() {
        let mut tour = sample_tour("The Forest Hiker", 10);
        tour.start_dates[0].participants_booked = 10;
        let doc = serde_json::to_value(TourDocument::from(tour)).unwrap();

        assert_eq!(doc["name"], "The Forest Hiker");
        assert_eq!(doc["availability"][0]["sold_out"], true);
        assert_eq!(doc["availability"][1]["available_places"], 10);
        assert!(doc.get("secret_tour").is_none());
    }
}
