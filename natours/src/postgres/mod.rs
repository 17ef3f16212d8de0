//! PostgreSQL implementation of the repository traits.
//!
//! Queries are built at runtime with `sqlx::query_as`, so the crate builds
//! without a live database. Operations that span tables run in one
//! transaction; capacity changes lock the departure row first.
//!
//! # Example
//!
//! ```no_run
//! use natours::config::Config;
//! use natours::postgres::PostgresDatabase;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env();
//! let database = PostgresDatabase::connect(&config.postgres).await?;
//! database.migrate().await?;
//! let repositories = database.repositories();
//! # Ok(())
//! # }
//! ```

pub mod bookings;
pub mod failed_bookings;
pub mod refunds;
pub mod reviews;
pub mod sessions;
pub mod tours;
pub mod users;

pub use bookings::PostgresBookingRepository;
pub use failed_bookings::PostgresFailedBookingRepository;
pub use refunds::PostgresRefundRepository;
pub use reviews::PostgresReviewRepository;
pub use sessions::PostgresSessionRepository;
pub use tours::PostgresTourRepository;
pub use users::PostgresUserRepository;

use crate::config::PostgresConfig;
use crate::repositories::{DatabaseProbe, Repositories, RepositoryError, RepositoryResult};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

/// Connection pool plus the repositories built on it.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with the configured limits.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the database is unreachable.
    pub async fn connect(config: &PostgresConfig) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if a migration fails.
    pub async fn migrate(&self) -> RepositoryResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.into()))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Every repository backed by this pool.
    #[must_use]
    pub fn repositories(&self) -> Repositories {
        Repositories {
            users: Arc::new(PostgresUserRepository::new(self.pool.clone())),
            sessions: Arc::new(PostgresSessionRepository::new(self.pool.clone())),
            tours: Arc::new(PostgresTourRepository::new(self.pool.clone())),
            reviews: Arc::new(PostgresReviewRepository::new(self.pool.clone())),
            bookings: Arc::new(PostgresBookingRepository::new(self.pool.clone())),
            refunds: Arc::new(PostgresRefundRepository::new(self.pool.clone())),
            failed_bookings: Arc::new(PostgresFailedBookingRepository::new(self.pool.clone())),
            database: Arc::new(self.clone()),
        }
    }
}

#[async_trait]
impl DatabaseProbe for PostgresDatabase {
    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map a unique violation to [`RepositoryError::Conflict`].
pub(crate) fn conflict_on_unique(err: sqlx::Error, message: impl FnOnce() -> String) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict(message());
        }
    }
    RepositoryError::Database(err)
}

/// Stored form of a count.
pub(crate) fn db_count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Read a count back, rejecting negative values.
pub(crate) fn count_from_db(value: i32, column: &str) -> RepositoryResult<u32> {
    u32::try_from(value).map_err(|_| RepositoryError::Corrupt(format!("{column} is negative: {value}")))
}

pub(crate) fn corrupt(column: &str, err: impl Display) -> RepositoryError {
    RepositoryError::Corrupt(format!("{column}: {err}"))
}
