//! PostgreSQL user repository.

use super::reviews::recompute_ratings;
use super::{conflict_on_unique, corrupt};
use crate::models::User;
use crate::repositories::{user_has_bookings, RepositoryResult, UserRepository};
use crate::types::{Role, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    photo: String,
    role: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = crate::repositories::RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: UserId::from_uuid(row.id),
            name: row.name,
            email: row.email,
            photo: row.photo,
            role: row.role.parse::<Role>().map_err(|e| corrupt("users.role", e))?,
            active: row.active,
            created_at: row.created_at,
        })
    }
}

/// Users stored in the `users` table.
#[derive(Clone)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn email_taken(email: &str) -> impl FnOnce() -> String + '_ {
    move || format!("Email {email} is already registered")
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn insert(&self, user: &User) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, email, photo, role, active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.photo)
        .bind(user.role.as_str())
        .bind(user.active)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, email_taken(&user.email)))?;
        Ok(())
    }

    async fn find(&self, id: UserId) -> RepositoryResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, photo, role, active, created_at
             FROM users
             WHERE id = $1 AND active",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, photo, role, active, created_at
             FROM users
             WHERE email = $1 AND active",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn list(&self) -> RepositoryResult<Vec<User>> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, photo, role, active, created_at
             FROM users
             WHERE active
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(User::try_from)
        .collect()
    }

    async fn update(&self, user: &User) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET name = $2, email = $3, photo = $4, role = $5, active = $6
             WHERE id = $1",
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.photo)
        .bind(user.role.as_str())
        .bind(user.active)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, email_taken(&user.email)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: UserId) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(false);
        }

        let (holding,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM bookings WHERE user_id = $1 AND NOT refunded")
                .bind(id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        if holding > 0 {
            return Err(user_has_bookings());
        }

        // Reviews, refunded bookings and refunds go with the user.
        let reviewed: Vec<(Uuid,)> =
            sqlx::query_as("SELECT DISTINCT tour_id FROM reviews WHERE user_id = $1")
                .bind(id.as_uuid())
                .fetch_all(&mut *tx)
                .await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        for (tour,) in reviewed {
            recompute_ratings(&mut tx, tour).await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}
