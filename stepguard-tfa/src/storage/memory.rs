//! In-memory record storage for development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use stepguard_core::KeyRegistration;

use crate::record::{MethodOptions, MethodRecord};

use super::{RecordStore, StorageError};

/// Record store backed by a concurrent map. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<Uuid, MethodRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch(&self, id: Uuid) -> Result<Option<MethodRecord>, StorageError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        method: &str,
    ) -> Result<Vec<MethodRecord>, StorageError> {
        let mut records: Vec<MethodRecord> = self
            .records
            .iter()
            .filter(|entry| entry.user_id == user_id && entry.method == method)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn insert(&self, record: MethodRecord) -> Result<(), StorageError> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn update_options(
        &self,
        id: Uuid,
        options: &MethodOptions,
    ) -> Result<bool, StorageError> {
        match self.records.get_mut(&id) {
            Some(mut entry) => {
                entry.options = options.to_value();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn persist_counter(
        &self,
        id: Uuid,
        registration: &KeyRegistration,
    ) -> Result<bool, StorageError> {
        // The map entry guard makes the compare-then-write atomic.
        match self.records.get_mut(&id) {
            Some(mut entry) => {
                let stored = entry
                    .decode_options()
                    .registrations
                    .iter()
                    .find(|r| r.key_handle == registration.key_handle)
                    .map(|r| r.counter);
                if matches!(stored, Some(current) if registration.counter <= current) {
                    return Ok(false);
                }
                entry.options = MethodOptions {
                    registrations: vec![registration.clone()],
                }
                .to_value();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for MemoryRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRecordStore")
            .field("records", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_scoped_to_user_and_method() {
        let store = MemoryRecordStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store.insert(MethodRecord::new(alice, "u2f", "key 1")).await.unwrap();
        store.insert(MethodRecord::new(alice, "u2f", "key 2")).await.unwrap();
        store.insert(MethodRecord::new(alice, "totp", "phone")).await.unwrap();
        store.insert(MethodRecord::new(bob, "u2f", "bob's key")).await.unwrap();

        let records = store.list_for_user(alice, "u2f").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.user_id == alice && r.method == "u2f"));
    }

    #[tokio::test]
    async fn update_options_reports_missing_record() {
        let store = MemoryRecordStore::new();
        let updated = store
            .update_options(Uuid::new_v4(), &MethodOptions::default())
            .await
            .unwrap();
        assert!(!updated);
    }
}
