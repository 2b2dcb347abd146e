//! User domain types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bazaar_core::{AddressId, Email, Permission, UserId};

/// A storefront user (domain type).
///
/// The password hash is deliberately not part of this type; stores hand it
/// out alongside the user only where verification needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// User's email address (unique).
    pub email: Email,
    /// Permission tags.
    pub permissions: BTreeSet<Permission>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a user. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub password_hash: String,
    pub permissions: BTreeSet<Permission>,
}

/// Self-service profile changes.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
}

/// A postal address owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zipcode: String,
    pub created_at: DateTime<Utc>,
}

/// Input for adding an address.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zipcode: String,
}

impl NewAddress {
    /// Name of the first blank field, if any.
    #[must_use]
    pub fn first_blank_field(&self) -> Option<&'static str> {
        [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("country", &self.country),
            ("zipcode", &self.zipcode),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}
