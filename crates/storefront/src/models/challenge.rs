//! Login challenge (one-time passcode).

use chrono::{DateTime, Utc};

use bazaar_core::{ChallengeId, UserId};

/// A six-digit code bound to a user, valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: ChallengeId,
    pub user_id: UserId,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Challenge {
    /// A challenge is dead strictly after its expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
