//! Dual-store report repository tests

mod helpers;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finsys_fraud::db::FraudReportRepository;
use finsys_fraud::docstore::{DocumentHeader, DocumentStore, DocumentStoreError, ReportDocument};
use finsys_fraud::error::ReportLookup;
use finsys_fraud::pagination::PageRequest;
use finsys_fraud::{ErrorKind, FraudError, StoreError};
use helpers::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use uuid::Uuid;

async fn live_metadata_rows(stores: &TestStores) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM fraud_reports WHERE deleted_at IS NULL")
        .fetch_one(&stores.pool)
        .await
        .unwrap()
}

async fn document_count(stores: &TestStores) -> usize {
    stores.docs.list_headers().await.unwrap().len()
}

fn faulty(stores: &TestStores, timeout: Duration) -> (Arc<FaultyDocumentStore>, FraudReportRepository) {
    let docs = Arc::new(FaultyDocumentStore::new(stores.docs.clone()));
    let repo = stores.reports_with(docs.clone(), timeout);
    (docs, repo)
}

/// Fails the first insert, then parks its cleanup until released
struct ParkedCleanupStore {
    inner: Arc<dyn DocumentStore>,
    failed_once: AtomicBool,
    cleanup_started: Notify,
    release_cleanup: Notify,
}

impl ParkedCleanupStore {
    fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failed_once: AtomicBool::new(false),
            cleanup_started: Notify::new(),
            release_cleanup: Notify::new(),
        }
    }
}

#[async_trait]
impl DocumentStore for ParkedCleanupStore {
    async fn insert(&self, doc: &ReportDocument) -> Result<(), DocumentStoreError> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            return Err(DocumentStoreError::Unavailable("first insert refused".to_string()));
        }
        self.inner.insert(doc).await
    }

    async fn find_one(
        &self,
        fraud_report_id: i64,
    ) -> Result<Option<ReportDocument>, DocumentStoreError> {
        self.inner.find_one(fraud_report_id).await
    }

    async fn update_content(
        &self,
        fraud_report_id: i64,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, DocumentStoreError> {
        self.inner
            .update_content(fraud_report_id, content, updated_at)
            .await
    }

    async fn delete(&self, fraud_report_id: i64) -> Result<u64, DocumentStoreError> {
        self.inner.delete(fraud_report_id).await
    }

    async fn delete_document(&self, id: Uuid) -> Result<u64, DocumentStoreError> {
        self.cleanup_started.notify_one();
        self.release_cleanup.notified().await;
        self.inner.delete_document(id).await
    }

    async fn find_many(&self, ids: &[i64]) -> Result<Vec<ReportDocument>, DocumentStoreError> {
        self.inner.find_many(ids).await
    }

    async fn list_headers(&self) -> Result<Vec<DocumentHeader>, DocumentStoreError> {
        self.inner.list_headers().await
    }
}

#[tokio::test]
async fn test_create_then_find_by_either_key() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let repo = stores.reports();

    let created = repo.create(tx.id, "body one".to_string()).await.unwrap();
    assert_eq!(created.transaction_id, tx.id);

    let by_id = repo.find_by_id(created.id).await.unwrap();
    assert_eq!(by_id, created);

    let by_tx = repo.find_by_transaction_id(tx.id).await.unwrap();
    assert_eq!(by_tx.id, created.id);
    assert_eq!(by_tx.report, "body one");
}

#[tokio::test]
async fn test_document_failure_on_create_leaves_no_metadata() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let (docs, repo) = faulty(&stores, Duration::from_secs(10));

    docs.set_fault(DocFault::FailInsert);
    let err = repo.create(tx.id, "lost".to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);

    docs.set_fault(DocFault::None);
    let err = repo.find_by_transaction_id(tx.id).await.unwrap_err();
    assert!(matches!(
        err,
        FraudError::ReportNotFound(ReportLookup::TransactionId(id)) if id == tx.id
    ));
    assert_eq!(live_metadata_rows(&stores).await, 0);
    assert_eq!(document_count(&stores).await, 0);

    // The next create is unaffected by the aborted one
    let report = repo.create(tx.id, "kept".to_string()).await.unwrap();
    assert_eq!(repo.find_by_id(report.id).await.unwrap().report, "kept");
}

#[tokio::test]
async fn test_lost_acknowledgement_does_not_leave_orphan() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let (docs, repo) = faulty(&stores, Duration::from_secs(10));

    docs.set_fault(DocFault::InsertThenFail);
    assert!(repo.create(tx.id, "ghost".to_string()).await.is_err());
    docs.set_fault(DocFault::None);

    assert_eq!(live_metadata_rows(&stores).await, 0);
    assert_eq!(document_count(&stores).await, 0);
}

#[tokio::test]
async fn test_late_cleanup_spares_report_that_reused_the_id() {
    let stores = test_stores().await;
    let first_tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let second_tx = stores.transactions.create(&draft(600.0)).await.unwrap();
    let docs = Arc::new(ParkedCleanupStore::new(stores.docs.clone()));
    let repo = stores.reports_with(docs.clone(), Duration::from_secs(10));

    let aborted = tokio::spawn({
        let repo = repo.clone();
        async move { repo.create(first_tx.id, "refused".to_string()).await }
    });

    // The failed create has rolled back and is parked in cleanup
    docs.cleanup_started.notified().await;
    let reused = repo.create(second_tx.id, "committed".to_string()).await.unwrap();
    assert_eq!(reused.id, 1);

    docs.release_cleanup.notify_one();
    assert!(aborted.await.unwrap().is_err());

    assert_eq!(repo.find_by_id(reused.id).await.unwrap().report, "committed");
    assert_eq!(
        repo.find_by_transaction_id(second_tx.id).await.unwrap().report,
        "committed"
    );
    assert_eq!(document_count(&stores).await, 1);
}

#[tokio::test]
async fn test_leftover_document_under_new_id_is_replaced() {
    let stores = test_stores().await;
    stores
        .docs
        .insert(&ReportDocument::new(
            1,
            "orphan body for another transaction".to_string(),
            finsys_common::time::now(),
        ))
        .await
        .unwrap();

    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let repo = stores.reports();
    let report = repo.create(tx.id, "fresh body".to_string()).await.unwrap();
    assert_eq!(report.id, 1);

    assert_eq!(repo.find_by_id(1).await.unwrap().report, "fresh body");
    let listed = repo.list(PageRequest::default()).await.unwrap();
    assert_eq!(listed.items[0].report, "fresh body");
    assert_eq!(document_count(&stores).await, 1);
}

#[tokio::test]
async fn test_stalled_document_store_is_bounded() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let timeout = Duration::from_millis(200);
    let (docs, repo) = faulty(&stores, timeout);

    docs.set_fault(DocFault::Hang);
    let start = Instant::now();
    let err = repo.create(tx.id, "stalled".to_string()).await.unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(matches!(
        err,
        FraudError::Store(StoreError::DocumentTimeout(d)) if d == timeout
    ));

    // The relational transaction was released
    docs.set_fault(DocFault::None);
    assert_eq!(live_metadata_rows(&stores).await, 0);
    stores.transactions.create(&draft(1.0)).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_report_for_transaction_42_conflicts() {
    let stores = test_stores().await;
    let drafts: Vec<_> = (0..42).map(|i| draft(100.0 + i as f64)).collect();
    let records = stores.transactions.create_batch(&drafts).await.unwrap();
    let tx_id = records.last().unwrap().id;
    assert_eq!(tx_id, 42);

    let repo = stores.reports();
    repo.create(tx_id, "first".to_string()).await.unwrap();
    let err = repo.create(tx_id, "second".to_string()).await.unwrap_err();
    assert!(matches!(err, FraudError::Conflict { transaction_id: 42 }));

    assert_eq!(live_metadata_rows(&stores).await, 1);
    assert_eq!(document_count(&stores).await, 1);
    assert_eq!(
        repo.find_by_transaction_id(42).await.unwrap().report,
        "first"
    );
}

#[tokio::test]
async fn test_create_for_unknown_transaction() {
    let stores = test_stores().await;
    let err = stores
        .reports()
        .create(777, "orphan".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, FraudError::TransactionNotFound(777)));
    assert_eq!(document_count(&stores).await, 0);
}

#[tokio::test]
async fn test_list_newest_first_with_content() {
    let stores = test_stores().await;
    let repo = stores.reports();

    let mut created = Vec::new();
    for i in 0..3 {
        let tx = stores.transactions.create(&draft(10.0 + i as f64)).await.unwrap();
        created.push(repo.create(tx.id, format!("report {}", i)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let page = repo.list(PageRequest::new(1, 10)).await.unwrap();
    assert_eq!(page.total, 3);
    let ids: Vec<i64> = page.items.iter().map(|r| r.id).collect();
    let expected: Vec<i64> = created.iter().rev().map(|r| r.id).collect();
    assert_eq!(ids, expected);
    for report in &page.items {
        assert!(report.report.starts_with("report "));
    }
    assert!(page
        .items
        .windows(2)
        .all(|w| w[0].generated_at >= w[1].generated_at));

    let second = repo.list(PageRequest::new(2, 2)).await.unwrap();
    assert_eq!(second.total, 3);
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].report, "report 0");
}

#[tokio::test]
async fn test_delete_tombstones_and_allows_recreate() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let repo = stores.reports();
    let report = repo.create(tx.id, "doomed".to_string()).await.unwrap();

    repo.delete(report.id).await.unwrap();
    assert!(repo.find_by_id(report.id).await.unwrap_err().is_not_found());
    assert_eq!(document_count(&stores).await, 0);
    assert!(matches!(
        repo.delete(report.id).await,
        Err(FraudError::ReportNotFound(ReportLookup::Id(_)))
    ));

    let again = repo.create(tx.id, "reborn".to_string()).await.unwrap();
    assert_ne!(again.id, report.id);
    assert_eq!(repo.list(PageRequest::default()).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_delete_rolls_back_when_document_delete_fails() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let (docs, repo) = faulty(&stores, Duration::from_secs(10));
    let report = repo.create(tx.id, "survivor".to_string()).await.unwrap();

    docs.set_fault(DocFault::FailDelete);
    assert!(repo.delete(report.id).await.is_err());
    docs.set_fault(DocFault::None);

    assert_eq!(repo.find_by_id(report.id).await.unwrap().report, "survivor");
}

#[tokio::test]
async fn test_update_replaces_content() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let repo = stores.reports();
    let report = repo.create(tx.id, "v1".to_string()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let updated = repo.update(report.id, "v2".to_string()).await.unwrap();
    assert_eq!(updated.report, "v2");
    assert_eq!(updated.generated_at, report.generated_at);
    assert!(updated.updated_at > report.updated_at);
    assert_eq!(repo.find_by_id(report.id).await.unwrap(), updated);
}

#[tokio::test]
async fn test_update_rolls_back_on_document_failure() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let (docs, repo) = faulty(&stores, Duration::from_secs(10));
    let report = repo.create(tx.id, "v1".to_string()).await.unwrap();

    docs.set_fault(DocFault::FailUpdate);
    let err = repo.update(report.id, "v2".to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);
    docs.set_fault(DocFault::None);

    let current = repo.find_by_id(report.id).await.unwrap();
    assert_eq!(current, report);
}

#[tokio::test]
async fn test_update_unknown_report_is_not_found() {
    let stores = test_stores().await;
    assert!(matches!(
        stores.reports().update(5, "x".to_string()).await,
        Err(FraudError::ReportNotFound(ReportLookup::Id(5)))
    ));
}

#[tokio::test]
async fn test_missing_document_hides_report_until_update_repairs_it() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let repo = stores.reports();
    let report = repo.create(tx.id, "v1".to_string()).await.unwrap();

    stores.docs.delete(report.id).await.unwrap();
    assert!(repo.find_by_id(report.id).await.unwrap_err().is_not_found());
    assert!(repo
        .find_by_transaction_id(tx.id)
        .await
        .unwrap_err()
        .is_not_found());

    let repaired = repo.update(report.id, "v2".to_string()).await.unwrap();
    assert_eq!(repaired.report, "v2");
    let doc = stores.docs.find_one(report.id).await.unwrap().unwrap();
    assert_eq!(doc.created_at, report.generated_at);
    assert_eq!(repo.find_by_id(report.id).await.unwrap().report, "v2");
}

#[tokio::test]
async fn test_list_fails_when_document_reads_fail() {
    let stores = test_stores().await;
    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let (docs, repo) = faulty(&stores, Duration::from_secs(10));
    repo.create(tx.id, "v1".to_string()).await.unwrap();

    docs.set_fault(DocFault::FailReads);
    let err = repo.list(PageRequest::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);
}

#[tokio::test]
async fn test_sweep_removes_old_orphans_and_reports_missing_documents() {
    let stores = test_stores().await;
    let repo = stores.reports();

    let tx = stores.transactions.create(&draft(500.0)).await.unwrap();
    let healthy = repo.create(tx.id, "fine".to_string()).await.unwrap();
    let tx2 = stores.transactions.create(&draft(600.0)).await.unwrap();
    let bodiless = repo.create(tx2.id, "gone".to_string()).await.unwrap();
    stores.docs.delete(bodiless.id).await.unwrap();

    let old = finsys_common::time::now() - chrono::Duration::hours(2);
    stores
        .docs
        .insert(&ReportDocument::new(9_001, "stale orphan".to_string(), old))
        .await
        .unwrap();
    stores
        .docs
        .insert(&ReportDocument::new(
            9_002,
            "fresh orphan".to_string(),
            finsys_common::time::now(),
        ))
        .await
        .unwrap();

    let summary = repo
        .sweep_orphan_documents(Duration::from_secs(600))
        .await
        .unwrap();
    assert_eq!(summary.orphans_deleted, 1);
    assert_eq!(summary.orphans_pending, 1);
    assert_eq!(summary.missing_documents, vec![bodiless.id]);

    assert!(stores.docs.find_one(9_001).await.unwrap().is_none());
    assert!(stores.docs.find_one(9_002).await.unwrap().is_some());
    assert_eq!(repo.find_by_id(healthy.id).await.unwrap().report, "fine");
}
