//! Database Test Utilities
//!
//! Throwaway relational and document stores in a temp directory

use finsys_common::db::{init_database, TransactionDraft};
use finsys_fraud::db::{FraudReportRepository, TransactionRepository};
use finsys_fraud::docstore::{DocumentStore, SqliteDocumentStore};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Both stores; `_dir` must outlive the test
pub struct TestStores {
    pub _dir: TempDir,
    pub pool: SqlitePool,
    pub docs: Arc<SqliteDocumentStore>,
    pub transactions: TransactionRepository,
}

impl TestStores {
    /// Report repository over these stores (or a wrapper around `docs`)
    pub fn reports_with(
        &self,
        docs: Arc<dyn DocumentStore>,
        doc_timeout: Duration,
    ) -> FraudReportRepository {
        FraudReportRepository::new(self.pool.clone(), docs, doc_timeout)
    }

    pub fn reports(&self) -> FraudReportRepository {
        self.reports_with(self.docs.clone(), Duration::from_secs(10))
    }
}

pub async fn test_stores() -> TestStores {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("finsys.db")).await.unwrap();
    let docs = Arc::new(
        SqliteDocumentStore::open(&dir.path().join("finsys-docs.db"), "fraud_reports")
            .await
            .unwrap(),
    );
    let transactions = TransactionRepository::new(pool.clone());
    TestStores {
        _dir: dir,
        pool,
        docs,
        transactions,
    }
}

/// Draft whose balances do not reconcile with the amount
pub fn draft(amount: f64) -> TransactionDraft {
    TransactionDraft {
        tx_type: "TRANSFER".to_string(),
        amount,
        name_orig: "C1305486145".to_string(),
        old_balance_orig: 0.0,
        new_balance_orig: 0.0,
        name_dest: "C553264065".to_string(),
        old_balance_dest: 0.0,
        new_balance_dest: 0.0,
        is_fraud: None,
    }
}

/// Draft with origin and destination balances moving by exactly `amount`
pub fn balanced_draft(amount: f64) -> TransactionDraft {
    TransactionDraft {
        old_balance_orig: amount + 50_000.0,
        new_balance_orig: 50_000.0,
        old_balance_dest: 0.0,
        new_balance_dest: amount,
        ..draft(amount)
    }
}

/// Poll `check` until it returns true or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
