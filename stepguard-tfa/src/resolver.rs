//! Candidate-set resolution for authentication.
//!
//! Decides which registered keys an authentication attempt is checked
//! against: only the selected record's own keys, or — with entry batching
//! enabled — the union of the user's keys across every record of the same
//! method. Each candidate remembers the record it came from, so a
//! successful authentication can write its counter back to the right row.

use stepguard_core::KeyRegistration;
use uuid::Uuid;

use crate::record::MethodRecord;
use crate::storage::RegistrationCatalog;

/// One registration eligible to answer a challenge, tagged with the record
/// that owns it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record_id: Uuid,
    pub registration: KeyRegistration,
}

/// Resolve the candidate registrations for `record`.
///
/// Batching is a read-only convenience: a storage failure while gathering
/// sibling records degrades to an empty set, which makes the ensuing
/// authentication fail closed rather than silently narrowing the key set.
pub async fn resolve_candidates(
    catalog: &RegistrationCatalog,
    record: &MethodRecord,
    allow_batching: bool,
) -> Vec<Candidate> {
    if !allow_batching {
        return record
            .decode_options()
            .registrations
            .into_iter()
            .map(|registration| Candidate {
                record_id: record.id,
                registration,
            })
            .collect();
    }

    match catalog.store().list_for_user(record.user_id, &record.method).await {
        Ok(records) => records
            .into_iter()
            .flat_map(|sibling| {
                let record_id = sibling.id;
                sibling
                    .decode_options()
                    .registrations
                    .into_iter()
                    .map(move |registration| Candidate {
                        record_id,
                        registration,
                    })
            })
            .collect(),
        Err(e) => {
            tracing::warn!(
                user_id = %record.user_id,
                method = %record.method,
                error = %e,
                "sibling record lookup failed; failing closed with no candidates"
            );
            Vec::new()
        }
    }
}

/// Strip candidates down to the registrations the protocol engine takes.
pub fn registrations(candidates: &[Candidate]) -> Vec<KeyRegistration> {
    candidates.iter().map(|c| c.registration.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MethodOptions;
    use crate::storage::{MemoryRecordStore, RecordStore};
    use std::sync::Arc;

    fn record_with_key(user: Uuid, handle: &str) -> MethodRecord {
        let mut record = MethodRecord::new(user, "u2f", handle);
        record.options = MethodOptions {
            registrations: vec![KeyRegistration {
                key_handle: handle.into(),
                public_key: "pk".into(),
                attestation_certificate: None,
                counter: 0,
            }],
        }
        .to_value();
        record
    }

    #[tokio::test]
    async fn unbatched_resolution_returns_only_the_record() {
        let store = Arc::new(MemoryRecordStore::new());
        let catalog = RegistrationCatalog::new(store.clone());
        let user = Uuid::new_v4();

        let r1 = record_with_key(user, "A");
        let r2 = record_with_key(user, "B");
        store.insert(r1.clone()).await.unwrap();
        store.insert(r2).await.unwrap();

        let candidates = resolve_candidates(&catalog, &r1, false).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].registration.key_handle, "A");
        assert_eq!(candidates[0].record_id, r1.id);
    }

    #[tokio::test]
    async fn batched_resolution_unions_sibling_records() {
        let store = Arc::new(MemoryRecordStore::new());
        let catalog = RegistrationCatalog::new(store.clone());
        let user = Uuid::new_v4();

        let r1 = record_with_key(user, "A");
        let r2 = record_with_key(user, "B");
        store.insert(r1.clone()).await.unwrap();
        store.insert(r2.clone()).await.unwrap();

        // Resolving against either record yields both keys.
        for record in [&r1, &r2] {
            let mut handles: Vec<String> = resolve_candidates(&catalog, record, true)
                .await
                .into_iter()
                .map(|c| c.registration.key_handle)
                .collect();
            handles.sort();
            assert_eq!(handles, ["A", "B"]);
        }
    }

    #[tokio::test]
    async fn batching_ignores_other_users_and_methods() {
        let store = Arc::new(MemoryRecordStore::new());
        let catalog = RegistrationCatalog::new(store.clone());
        let user = Uuid::new_v4();

        let mine = record_with_key(user, "A");
        let theirs = record_with_key(Uuid::new_v4(), "X");
        let mut other_method = record_with_key(user, "Y");
        other_method.method = "totp".into();
        store.insert(mine.clone()).await.unwrap();
        store.insert(theirs).await.unwrap();
        store.insert(other_method).await.unwrap();

        let candidates = resolve_candidates(&catalog, &mine, true).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].registration.key_handle, "A");
    }
}
