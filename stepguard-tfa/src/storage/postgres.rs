//! PostgreSQL record storage.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use stepguard_core::KeyRegistration;

use crate::record::{MethodOptions, MethodRecord};

use super::{RecordStore, StorageError};

/// PostgreSQL-backed record store.
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Connect to the database.
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Create from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Check database connection health.
    pub async fn check_health(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn fetch(&self, id: Uuid) -> Result<Option<MethodRecord>, StorageError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, user_id, method, title, options, created_at
            FROM tfa_methods
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(row.map(RecordRow::into_record))
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        method: &str,
    ) -> Result<Vec<MethodRecord>, StorageError> {
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT id, user_id, method, title, options, created_at
            FROM tfa_methods
            WHERE user_id = $1 AND method = $2
            ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .bind(method)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(rows.into_iter().map(RecordRow::into_record).collect())
    }

    async fn insert(&self, record: MethodRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO tfa_methods (id, user_id, method, title, options, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.method)
        .bind(&record.title)
        .bind(&record.options)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    async fn update_options(
        &self,
        id: Uuid,
        options: &MethodOptions,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE tfa_methods
            SET options = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(options.to_value())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn persist_counter(
        &self,
        id: Uuid,
        registration: &KeyRegistration,
    ) -> Result<bool, StorageError> {
        let options = MethodOptions {
            registrations: vec![registration.clone()],
        };

        // Single guarded UPDATE: the stored counter must still be below the
        // new one, so concurrent write-backs cannot both land.
        let result = sqlx::query(
            r#"
            UPDATE tfa_methods
            SET options = $2
            WHERE id = $1
              AND COALESCE((options #>> '{registrations,0,counter}')::bigint, -1) < $3
            "#,
        )
        .bind(id)
        .bind(options.to_value())
        .bind(i64::from(registration.counter))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

/// Database row for method records.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    user_id: Uuid,
    method: String,
    title: String,
    options: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl RecordRow {
    fn into_record(self) -> MethodRecord {
        MethodRecord {
            id: self.id,
            user_id: self.user_id,
            method: self.method,
            title: self.title,
            options: self.options,
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for PostgresRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRecordStore")
            .field("pool", &"<PgPool>")
            .finish()
    }
}
