//! Fault injection for the document store
//!
//! Wraps a real store and fails (or stalls) selected operations on demand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finsys_fraud::docstore::{DocumentHeader, DocumentStore, DocumentStoreError, ReportDocument};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Which operations misbehave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DocFault {
    None = 0,
    FailInsert = 1,
    FailUpdate = 2,
    FailDelete = 3,
    FailReads = 4,
    /// Every operation stalls far beyond any test timeout
    Hang = 5,
    /// Insert lands, then reports failure
    InsertThenFail = 6,
}

impl DocFault {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DocFault::FailInsert,
            2 => DocFault::FailUpdate,
            3 => DocFault::FailDelete,
            4 => DocFault::FailReads,
            5 => DocFault::Hang,
            6 => DocFault::InsertThenFail,
            _ => DocFault::None,
        }
    }
}

pub struct FaultyDocumentStore {
    inner: Arc<dyn DocumentStore>,
    fault: AtomicU8,
}

impl FaultyDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            fault: AtomicU8::new(DocFault::None as u8),
        }
    }

    pub fn set_fault(&self, fault: DocFault) {
        self.fault.store(fault as u8, Ordering::SeqCst);
    }

    fn fault(&self) -> DocFault {
        DocFault::from_u8(self.fault.load(Ordering::SeqCst))
    }

    async fn gate(&self, failing: DocFault) -> Result<(), DocumentStoreError> {
        match self.fault() {
            DocFault::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            f if f == failing => Err(DocumentStoreError::Unavailable(format!(
                "injected fault {:?}",
                f
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FaultyDocumentStore {
    async fn insert(&self, doc: &ReportDocument) -> Result<(), DocumentStoreError> {
        if self.fault() == DocFault::InsertThenFail {
            self.inner.insert(doc).await?;
            return Err(DocumentStoreError::Unavailable(
                "acknowledgement lost".to_string(),
            ));
        }
        self.gate(DocFault::FailInsert).await?;
        self.inner.insert(doc).await
    }

    async fn find_one(
        &self,
        fraud_report_id: i64,
    ) -> Result<Option<ReportDocument>, DocumentStoreError> {
        self.gate(DocFault::FailReads).await?;
        self.inner.find_one(fraud_report_id).await
    }

    async fn update_content(
        &self,
        fraud_report_id: i64,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, DocumentStoreError> {
        self.gate(DocFault::FailUpdate).await?;
        self.inner
            .update_content(fraud_report_id, content, updated_at)
            .await
    }

    async fn delete(&self, fraud_report_id: i64) -> Result<u64, DocumentStoreError> {
        self.gate(DocFault::FailDelete).await?;
        self.inner.delete(fraud_report_id).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<u64, DocumentStoreError> {
        self.gate(DocFault::FailDelete).await?;
        self.inner.delete_document(id).await
    }

    async fn find_many(&self, ids: &[i64]) -> Result<Vec<ReportDocument>, DocumentStoreError> {
        self.gate(DocFault::FailReads).await?;
        self.inner.find_many(ids).await
    }

    async fn list_headers(&self) -> Result<Vec<DocumentHeader>, DocumentStoreError> {
        self.gate(DocFault::FailReads).await?;
        self.inner.list_headers().await
    }
}
