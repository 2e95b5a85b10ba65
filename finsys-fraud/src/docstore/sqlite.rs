//! SQLite-backed document store
//!
//! Documents are stored as JSON text in their own database file with their
//! own pool, so a stall or failure there does not touch the relational
//! store's connections. Field lookups go through `json_extract`.

use super::{DocumentHeader, DocumentStore, DocumentStoreError, ReportDocument};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use finsys_common::db::{open_sqlite_pool, DEFAULT_BUSY_TIMEOUT_MS};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const MAX_CONNECTIONS: u32 = 5;

#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteDocumentStore {
    /// Open (creating if needed) the document database at `path`
    pub async fn open(path: &Path, collection: &str) -> Result<Self, DocumentStoreError> {
        let busy_timeout = Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS);
        let pool = open_sqlite_pool(path, MAX_CONNECTIONS, busy_timeout)
            .await
            .map_err(|e| match e {
                finsys_common::Error::Database(db) => DocumentStoreError::Backend(db),
                other => DocumentStoreError::Unavailable(other.to_string()),
            })?;
        info!(
            "Opened document store: {} (collection {})",
            path.display(),
            collection
        );
        Self::with_pool(pool, collection).await
    }

    /// Use an already-open pool
    pub async fn with_pool(pool: SqlitePool, collection: &str) -> Result<Self, DocumentStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        // Superseded by the unique index below
        sqlx::query("DROP INDEX IF EXISTS idx_documents_fraud_report_id")
            .execute(&pool)
            .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_collection_report_id
            ON documents(collection, json_extract(body, '$.fraud_report_id'))
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    fn parse(body: &str) -> Result<ReportDocument, DocumentStoreError> {
        Ok(serde_json::from_str(body)?)
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, doc: &ReportDocument) -> Result<(), DocumentStoreError> {
        let body = serde_json::to_string(doc)?;
        sqlx::query("INSERT INTO documents (id, collection, body) VALUES (?, ?, ?)")
            .bind(doc.id.to_string())
            .bind(&self.collection)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_one(
        &self,
        fraud_report_id: i64,
    ) -> Result<Option<ReportDocument>, DocumentStoreError> {
        let row = sqlx::query(
            r#"
            SELECT body FROM documents
            WHERE collection = ? AND json_extract(body, '$.fraud_report_id') = ?
            "#,
        )
        .bind(&self.collection)
        .bind(fraud_report_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(Self::parse(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn update_content(
        &self,
        fraud_report_id: i64,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, DocumentStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = json_set(body, '$.content', ?, '$.updated_at', ?)
            WHERE collection = ? AND json_extract(body, '$.fraud_report_id') = ?
            "#,
        )
        .bind(content)
        .bind(updated_at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .bind(&self.collection)
        .bind(fraud_report_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, fraud_report_id: i64) -> Result<u64, DocumentStoreError> {
        let result = sqlx::query(
            "DELETE FROM documents WHERE collection = ? AND json_extract(body, '$.fraud_report_id') = ?",
        )
        .bind(&self.collection)
        .bind(fraud_report_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_document(&self, id: Uuid) -> Result<u64, DocumentStoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(&self.collection)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_many(&self, ids: &[i64]) -> Result<Vec<ReportDocument>, DocumentStoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT body FROM documents WHERE collection = ");
        query.push_bind(self.collection.clone());
        query.push(" AND json_extract(body, '$.fraud_report_id') IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let body: String = row.try_get("body")?;
                Self::parse(&body)
            })
            .collect()
    }

    async fn list_headers(&self) -> Result<Vec<DocumentHeader>, DocumentStoreError> {
        let rows = sqlx::query("SELECT body FROM documents WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let body: String = row.try_get("body")?;
                let doc = Self::parse(&body)?;
                Ok(DocumentHeader {
                    fraud_report_id: doc.fraud_report_id,
                    created_at: doc.created_at,
                })
            })
            .collect()
    }
}
