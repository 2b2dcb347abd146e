//! User repository: accounts, password hashes and addresses.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use bazaar_core::{AddressId, Email, Permission, UserId};

use super::RepositoryError;
use crate::models::user::{Address, NewAddress, NewUser, ProfileUpdate, User};

/// Persistence for users and their credentials. Owns email uniqueness.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new user.
    ///
    /// Returns `RepositoryError::Conflict` if the email is already taken.
    async fn create(&self, user: &NewUser) -> Result<User, RepositoryError>;

    /// Get a user by ID.
    async fn get_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    /// Get a user by exact email.
    async fn get_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError>;

    /// Get a user together with their password hash, by email.
    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError>;

    /// Get a user together with their password hash, by ID.
    async fn get_password_hash_by_id(
        &self,
        id: UserId,
    ) -> Result<Option<(User, String)>, RepositoryError>;

    /// Replace a user's password hash.
    ///
    /// Returns `RepositoryError::NotFound` if the user doesn't exist.
    async fn update_password(&self, id: UserId, password_hash: &str)
    -> Result<(), RepositoryError>;

    /// Update names and email.
    ///
    /// Returns `RepositoryError::Conflict` if the new email belongs to
    /// someone else, `RepositoryError::NotFound` if the user doesn't exist.
    async fn update_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError>;

    /// Add an address for a user.
    async fn add_address(
        &self,
        user_id: UserId,
        address: &NewAddress,
    ) -> Result<Address, RepositoryError>;

    /// All addresses of a user, oldest first.
    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<Address>, RepositoryError>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i32,
    first_name: String,
    last_name: String,
    email: String,
    permissions: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct UserWithHashRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: String,
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: i32,
    user_id: i32,
    street: String,
    city: String,
    state: String,
    country: String,
    zipcode: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&row.email).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })?;

        let permissions = row
            .permissions
            .iter()
            .map(|p| p.parse::<Permission>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(RepositoryError::DataCorruption)?;

        Ok(Self {
            id: UserId::new(row.id),
            first_name: row.first_name,
            last_name: row.last_name,
            email,
            permissions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: AddressId::new(row.id),
            user_id: UserId::new(row.user_id),
            street: row.street,
            city: row.city,
            state: row.state,
            country: row.country,
            zipcode: row.zipcode,
            created_at: row.created_at,
        }
    }
}

/// `PostgreSQL` implementation of [`CredentialStore`].
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new user repository.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn with_hash(row: UserWithHashRow) -> Result<(User, String), RepositoryError> {
    Ok((User::try_from(row.user)?, row.password_hash))
}

#[async_trait]
impl CredentialStore for PgUserRepository {
    async fn create(&self, user: &NewUser) -> Result<User, RepositoryError> {
        let permissions: Vec<&str> = user.permissions.iter().map(|p| p.as_str()).collect();

        let row = sqlx::query_as::<_, UserRow>(
            r"
            INSERT INTO users (first_name, last_name, email, password_hash, permissions)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, first_name, last_name, email, permissions, created_at, updated_at
            ",
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.email.as_str())
        .bind(&user.password_hash)
        .bind(&permissions)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, "email already exists"))?;

        row.try_into()
    }

    async fn get_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, first_name, last_name, email, permissions, created_at, updated_at
            FROM users
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, UserRow>(
            r"
            SELECT id, first_name, last_name, email, permissions, created_at, updated_at
            FROM users
            WHERE email = $1
            ",
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn get_password_hash(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        sqlx::query_as::<_, UserWithHashRow>(
            r"
            SELECT id, first_name, last_name, email, permissions, created_at, updated_at,
                   password_hash
            FROM users
            WHERE email = $1
            ",
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(with_hash)
        .transpose()
    }

    async fn get_password_hash_by_id(
        &self,
        id: UserId,
    ) -> Result<Option<(User, String)>, RepositoryError> {
        sqlx::query_as::<_, UserWithHashRow>(
            r"
            SELECT id, first_name, last_name, email, permissions, created_at, updated_at,
                   password_hash
            FROM users
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(with_hash)
        .transpose()
    }

    async fn update_password(
        &self,
        id: UserId,
        password_hash: &str,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET password_hash = $1, updated_at = NOW()
            WHERE id = $2
            ",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn update_profile(
        &self,
        id: UserId,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, UserRow>(
            r"
            UPDATE users
            SET first_name = $1, last_name = $2, email = $3, updated_at = NOW()
            WHERE id = $4
            RETURNING id, first_name, last_name, email, permissions, created_at, updated_at
            ",
        )
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(update.email.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, "email already exists"))?
        .ok_or(RepositoryError::NotFound)?
        .try_into()
    }

    async fn add_address(
        &self,
        user_id: UserId,
        address: &NewAddress,
    ) -> Result<Address, RepositoryError> {
        let row = sqlx::query_as::<_, AddressRow>(
            r"
            INSERT INTO addresses (user_id, street, city, state, country, zipcode)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, street, city, state, country, zipcode, created_at
            ",
        )
        .bind(user_id)
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.country)
        .bind(&address.zipcode)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_write(e, "unknown user"))?;

        Ok(row.into())
    }

    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<Address>, RepositoryError> {
        let rows = sqlx::query_as::<_, AddressRow>(
            r"
            SELECT id, user_id, street, city, state, country, zipcode, created_at
            FROM addresses
            WHERE user_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Address::from).collect())
    }
}
