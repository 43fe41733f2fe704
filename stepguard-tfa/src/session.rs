//! Session-scoped single-use challenge storage.
//!
//! Each session holds at most one live challenge per purpose. `put`
//! replaces any prior value for that purpose, and `take` reads and clears
//! in one step, so a stored challenge can satisfy exactly one verification
//! attempt. Challenges expire after five minutes; an expired entry behaves
//! exactly like an absent one.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Maximum age for stored challenges (5 minutes).
const CHALLENGE_EXPIRY_SECS: u64 = 300;

/// Opaque identifier of one request-handling session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which ceremony a stored challenge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengePurpose {
    Registration,
    Authentication,
}

struct StoredChallenge {
    payload: String,
    expires_at: Instant,
}

/// In-memory store of pending challenges, keyed by session and purpose.
pub struct ChallengeStore {
    entries: DashMap<(SessionId, ChallengePurpose), StoredChallenge>,
    expiry: Duration,
}

impl ChallengeStore {
    pub fn new() -> Self {
        Self::with_expiry(Duration::from_secs(CHALLENGE_EXPIRY_SECS))
    }

    /// Store with a custom expiry window.
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            expiry,
        }
    }

    /// Store a challenge payload, replacing any prior value for the same
    /// session and purpose.
    pub fn put(&self, session: &SessionId, purpose: ChallengePurpose, payload: String) {
        self.entries.insert(
            (session.clone(), purpose),
            StoredChallenge {
                payload,
                expires_at: Instant::now() + self.expiry,
            },
        );
    }

    /// Read and clear the stored challenge. A second call before the next
    /// `put` returns `None`, as does a call after expiry.
    pub fn take(&self, session: &SessionId, purpose: ChallengePurpose) -> Option<String> {
        let (_, entry) = self.entries.remove(&(session.clone(), purpose))?;
        if entry.expires_at > Instant::now() {
            Some(entry.payload)
        } else {
            None // Expired
        }
    }

    /// Drop everything stored for a session (request-end cleanup).
    pub fn clear_session(&self, session: &SessionId) {
        self.entries.retain(|(sid, _), _| sid != session);
    }

    /// Remove expired challenges (called periodically).
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_is_single_use() {
        let store = ChallengeStore::new();
        let session = SessionId::from("s1");

        store.put(&session, ChallengePurpose::Registration, "payload".into());
        assert_eq!(
            store.take(&session, ChallengePurpose::Registration).as_deref(),
            Some("payload")
        );
        assert!(store.take(&session, ChallengePurpose::Registration).is_none());
    }

    #[test]
    fn purposes_are_independent_slots() {
        let store = ChallengeStore::new();
        let session = SessionId::from("s1");

        store.put(&session, ChallengePurpose::Registration, "reg".into());
        store.put(&session, ChallengePurpose::Authentication, "auth".into());

        assert_eq!(
            store.take(&session, ChallengePurpose::Authentication).as_deref(),
            Some("auth")
        );
        assert_eq!(
            store.take(&session, ChallengePurpose::Registration).as_deref(),
            Some("reg")
        );
    }

    #[test]
    fn put_replaces_prior_value() {
        let store = ChallengeStore::new();
        let session = SessionId::from("s1");

        store.put(&session, ChallengePurpose::Registration, "old".into());
        store.put(&session, ChallengePurpose::Registration, "new".into());
        assert_eq!(
            store.take(&session, ChallengePurpose::Registration).as_deref(),
            Some("new")
        );
    }

    #[test]
    fn sessions_do_not_see_each_other() {
        let store = ChallengeStore::new();
        store.put(&SessionId::from("a"), ChallengePurpose::Registration, "x".into());
        assert!(store
            .take(&SessionId::from("b"), ChallengePurpose::Registration)
            .is_none());
    }

    #[test]
    fn expired_challenge_reads_as_absent() {
        let store = ChallengeStore::with_expiry(Duration::ZERO);
        let session = SessionId::from("s1");

        store.put(&session, ChallengePurpose::Authentication, "stale".into());
        assert!(store.take(&session, ChallengePurpose::Authentication).is_none());
    }

    #[test]
    fn clear_session_drops_both_slots() {
        let store = ChallengeStore::new();
        let session = SessionId::from("s1");

        store.put(&session, ChallengePurpose::Registration, "r".into());
        store.put(&session, ChallengePurpose::Authentication, "a".into());
        store.clear_session(&session);
        assert!(store.is_empty());
    }
}
