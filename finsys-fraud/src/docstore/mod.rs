//! Document store for report bodies
//!
//! Report narratives are schemaless documents keyed by `fraud_report_id`.
//! The store is a separate failure domain from the relational store, so the
//! report repository talks to it only through [`DocumentStore`].

pub mod sqlite;

pub use sqlite::SqliteDocumentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("Document backend error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("Document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

/// Narrative body of a fraud report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub fraud_report_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportDocument {
    pub fn new(fraud_report_id: i64, content: String, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fraud_report_id,
            content,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Identity and age of a stored document, for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentHeader {
    pub fraud_report_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Query surface over a collection of report documents
///
/// All lookups match `fraud_report_id` exactly, and a collection holds at
/// most one document per `fraud_report_id`. Implementations must not assume
/// they are called inside any relational transaction.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, doc: &ReportDocument) -> Result<(), DocumentStoreError>;

    async fn find_one(&self, fraud_report_id: i64)
        -> Result<Option<ReportDocument>, DocumentStoreError>;

    /// Set `content` and `updated_at`; returns the number of matched documents
    async fn update_content(
        &self,
        fraud_report_id: i64,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, DocumentStoreError>;

    /// Returns the number of deleted documents
    async fn delete(&self, fraud_report_id: i64) -> Result<u64, DocumentStoreError>;

    /// Delete one document by its own `_id`, whatever report it names
    async fn delete_document(&self, id: Uuid) -> Result<u64, DocumentStoreError>;

    /// Documents whose `fraud_report_id` is in `ids`, in no particular order
    async fn find_many(&self, ids: &[i64]) -> Result<Vec<ReportDocument>, DocumentStoreError>;

    async fn list_headers(&self) -> Result<Vec<DocumentHeader>, DocumentStoreError>;
}
