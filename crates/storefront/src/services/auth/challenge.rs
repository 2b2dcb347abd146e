//! One-time login challenges.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::instrument;

use bazaar_core::UserId;

use super::AuthError;
use crate::db::ChallengeStore;
use crate::models::challenge::Challenge;

/// How long a challenge stays valid.
pub const CHALLENGE_TTL_MINUTES: i64 = 5;

/// Number of digits in a challenge code.
pub const CODE_LENGTH: usize = 6;

/// Process-wide source of challenge codes.
///
/// Seeded once from the OS; clones share the same generator.
#[derive(Clone)]
pub struct CodeGenerator {
    rng: Arc<Mutex<StdRng>>,
}

impl std::fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGenerator").finish_non_exhaustive()
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    /// Create a generator seeded from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
        }
    }

    /// Six independent uniform decimal digits.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        (0..CODE_LENGTH)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect()
    }
}

/// Issues and checks login challenges for one request.
pub struct ChallengeIssuer<'a> {
    store: &'a dyn ChallengeStore,
    codes: &'a CodeGenerator,
}

impl<'a> ChallengeIssuer<'a> {
    #[must_use]
    pub const fn new(store: &'a dyn ChallengeStore, codes: &'a CodeGenerator) -> Self {
        Self { store, codes }
    }

    /// Create and persist a fresh challenge for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Repository` if the challenge cannot be stored.
    pub async fn issue(&self, user_id: UserId) -> Result<Challenge, AuthError> {
        self.issue_at(user_id, Utc::now()).await
    }

    /// Create a challenge as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Repository` if the challenge cannot be stored.
    #[instrument(skip(self))]
    pub async fn issue_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Challenge, AuthError> {
        let code = self.codes.generate();
        let expires_at = now + Duration::minutes(CHALLENGE_TTL_MINUTES);

        let challenge = self.store.create(user_id, &code, expires_at).await?;
        tracing::debug!(challenge_id = %challenge.id, "challenge issued");

        Ok(challenge)
    }

    /// Check `code` against the user's latest challenge and consume it.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::ChallengeNotFound` if there is no challenge (or a
    /// concurrent caller consumed it first), `AuthError::ChallengeExpired` if
    /// it is past its expiry, `AuthError::ChallengeMismatch` if the code differs.
    pub async fn verify(&self, user_id: UserId, code: &str) -> Result<(), AuthError> {
        self.verify_at(user_id, code, Utc::now()).await
    }

    /// Verify as of `now`.
    ///
    /// # Errors
    ///
    /// See [`ChallengeIssuer::verify`].
    #[instrument(skip(self, code))]
    pub async fn verify_at(
        &self,
        user_id: UserId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let challenge = self
            .store
            .latest(user_id)
            .await?
            .ok_or(AuthError::ChallengeNotFound)?;

        if challenge.is_expired_at(now) {
            return Err(AuthError::ChallengeExpired);
        }

        if !constant_time_eq(challenge.code.as_bytes(), code.as_bytes()) {
            return Err(AuthError::ChallengeMismatch);
        }

        if !self.store.consume(&challenge).await? {
            return Err(AuthError::ChallengeNotFound);
        }

        Ok(())
    }
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;

    #[test]
    fn test_generate_code_format() {
        let codes = CodeGenerator::new();
        for _ in 0..100 {
            let code = codes.generate();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generate_code_allows_leading_zero() {
        // Each digit is drawn independently, so 0 must show up in first place
        // roughly one time in ten.
        let codes = CodeGenerator::new();
        assert!((0..1000).any(|_| codes.generate().starts_with('0')));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"123456", b"123456"));
        assert!(!constant_time_eq(b"123456", b"123457"));
        assert!(!constant_time_eq(b"123456", b"12345"));
    }

    #[tokio::test]
    async fn test_verify_succeeds_exactly_once() {
        let store = MemoryStore::new();
        let codes = CodeGenerator::new();
        let issuer = ChallengeIssuer::new(&store, &codes);
        let user = UserId::new(1);

        let challenge = issuer.issue(user).await.unwrap();
        issuer.verify(user, &challenge.code).await.unwrap();

        assert!(matches!(
            issuer.verify(user, &challenge.code).await,
            Err(AuthError::ChallengeNotFound)
        ));
    }

    #[tokio::test]
    async fn test_expired_challenge_fails_even_with_right_code() {
        let store = MemoryStore::new();
        let codes = CodeGenerator::new();
        let issuer = ChallengeIssuer::new(&store, &codes);
        let user = UserId::new(1);

        let issued_at = Utc::now() - Duration::minutes(6);
        let challenge = issuer.issue_at(user, issued_at).await.unwrap();

        assert!(matches!(
            issuer.verify(user, &challenge.code).await,
            Err(AuthError::ChallengeExpired)
        ));
    }

    #[tokio::test]
    async fn test_challenge_valid_until_expiry_instant() {
        let store = MemoryStore::new();
        let codes = CodeGenerator::new();
        let issuer = ChallengeIssuer::new(&store, &codes);
        let user = UserId::new(1);

        let challenge = issuer.issue(user).await.unwrap();
        issuer
            .verify_at(user, &challenge.code, challenge.expires_at)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_latest_challenge_counts() {
        let store = MemoryStore::new();
        let codes = CodeGenerator::new();
        let issuer = ChallengeIssuer::new(&store, &codes);
        let user = UserId::new(1);

        let first = issuer.issue(user).await.unwrap();
        let second = issuer.issue(user).await.unwrap();

        if first.code != second.code {
            assert!(matches!(
                issuer.verify(user, &first.code).await,
                Err(AuthError::ChallengeMismatch)
            ));
        }
        issuer.verify(user, &second.code).await.unwrap();
        assert_eq!(store.challenge_count(user), 0);
    }

    #[tokio::test]
    async fn test_no_challenge() {
        let store = MemoryStore::new();
        let codes = CodeGenerator::new();
        let issuer = ChallengeIssuer::new(&store, &codes);

        assert!(matches!(
            issuer.verify(UserId::new(9), "000000").await,
            Err(AuthError::ChallengeNotFound)
        ));
    }
}
