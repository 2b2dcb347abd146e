//! Login challenge (OTP) repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use bazaar_core::{ChallengeId, UserId};

use super::RepositoryError;
use crate::models::challenge::Challenge;

/// Persistence for login challenges.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Persist a new challenge.
    async fn create(
        &self,
        user_id: UserId,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Challenge, RepositoryError>;

    /// The most recently created challenge for a user, expired or not.
    async fn latest(&self, user_id: UserId) -> Result<Option<Challenge>, RepositoryError>;

    /// Consume `challenge` and every older challenge of the same user.
    ///
    /// Returns `false` when `challenge` was already gone, i.e. someone else
    /// consumed it first.
    async fn consume(&self, challenge: &Challenge) -> Result<bool, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: i32,
    user_id: i32,
    otp: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<ChallengeRow> for Challenge {
    fn from(row: ChallengeRow) -> Self {
        Self {
            id: ChallengeId::new(row.id),
            user_id: UserId::new(row.user_id),
            code: row.otp,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

/// `PostgreSQL` implementation of [`ChallengeStore`].
#[derive(Clone)]
pub struct PgChallengeRepository {
    pool: PgPool,
}

impl PgChallengeRepository {
    /// Create a new challenge repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChallengeStore for PgChallengeRepository {
    async fn create(
        &self,
        user_id: UserId,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Challenge, RepositoryError> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r"
            INSERT INTO otps (user_id, otp, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, otp, expires_at, created_at
            ",
        )
        .bind(user_id)
        .bind(code)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, "unknown user"))?;

        Ok(row.into())
    }

    async fn latest(&self, user_id: UserId) -> Result<Option<Challenge>, RepositoryError> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r"
            SELECT id, user_id, otp, expires_at, created_at
            FROM otps
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Challenge::from))
    }

    async fn consume(&self, challenge: &Challenge) -> Result<bool, RepositoryError> {
        let consumed: bool = sqlx::query_scalar(
            r"
            WITH deleted AS (
                DELETE FROM otps
                WHERE user_id = $1 AND id <= $2
                RETURNING id
            )
            SELECT EXISTS (SELECT 1 FROM deleted WHERE id = $2)
            ",
        )
        .bind(challenge.user_id)
        .bind(challenge.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(consumed)
    }
}
