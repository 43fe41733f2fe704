//! Method-record storage.
//!
//! Provides the read/write contract over persisted method records:
//! - **In-memory** (`MemoryRecordStore`): development and tests.
//! - **PostgreSQL** (`PostgresRecordStore`): production persistence.
//!
//! [`RegistrationCatalog`] is the facade the method adapters talk to; it
//! layers the registration-specific queries (keys per user, counter
//! write-back) over whichever backend is plugged in.

mod memory;
mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PostgresRecordStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use stepguard_core::KeyRegistration;

use crate::record::{MethodOptions, MethodRecord};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Read/write contract over persisted method records.
///
/// The storage engine itself is external; implementations do not retry.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a single record by id.
    async fn fetch(&self, id: Uuid) -> Result<Option<MethodRecord>, StorageError>;

    /// All records of one method owned by a user.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        method: &str,
    ) -> Result<Vec<MethodRecord>, StorageError>;

    /// Insert a new record.
    async fn insert(&self, record: MethodRecord) -> Result<(), StorageError>;

    /// Overwrite a record's options. Returns false when the record is gone.
    async fn update_options(
        &self,
        id: Uuid,
        options: &MethodOptions,
    ) -> Result<bool, StorageError>;

    /// Atomically overwrite a record's options with the single updated
    /// registration, but only while the stored counter is still below the
    /// new one. Returns false when the guard fails (record gone, or a
    /// concurrent authentication already advanced the counter).
    ///
    /// This is the read-modify-write the replay protection depends on:
    /// two concurrent authentications passing the in-memory counter check
    /// cannot both commit.
    async fn persist_counter(
        &self,
        id: Uuid,
        registration: &KeyRegistration,
    ) -> Result<bool, StorageError>;
}

/// Registration-centric facade over a [`RecordStore`].
#[derive(Clone)]
pub struct RegistrationCatalog {
    store: Arc<dyn RecordStore>,
}

impl RegistrationCatalog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Every bound security key of a user for one method, keyed by the
    /// record it lives in. Records with no registration yet are skipped.
    /// Used to build the exclusion set during setup.
    pub async fn registrations_for_user(
        &self,
        user_id: Uuid,
        method: &str,
    ) -> Result<HashMap<Uuid, KeyRegistration>, StorageError> {
        let records = self.store.list_for_user(user_id, method).await?;

        let mut out = HashMap::new();
        for record in records {
            let mut options = record.decode_options();
            if options.is_empty() {
                continue;
            }
            out.insert(record.id, options.registrations.remove(0));
        }
        Ok(out)
    }

    /// Persist an updated counter against the exact record whose key
    /// signed. Returns false when the guarded write did not land.
    pub async fn persist_counter_update(
        &self,
        record_id: Uuid,
        updated: &KeyRegistration,
    ) -> Result<bool, StorageError> {
        let persisted = self.store.persist_counter(record_id, updated).await?;
        if persisted {
            tracing::debug!(
                record_id = %record_id,
                counter = updated.counter,
                "registration counter persisted"
            );
        } else {
            tracing::warn!(
                record_id = %record_id,
                counter = updated.counter,
                "counter write-back rejected; record missing or counter raced"
            );
        }
        Ok(persisted)
    }
}

impl std::fmt::Debug for RegistrationCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationCatalog").finish_non_exhaustive()
    }
}
