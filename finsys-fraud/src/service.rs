//! Report and transaction services
//!
//! Thin orchestration over the repositories. The services own input checks,
//! report generation and the hand-off to the scoring dispatcher; the
//! repositories own storage semantics.

use crate::db::{FraudReport, FraudReportRepository, TransactionFilter, TransactionRepository};
use crate::dispatcher::ScoringDispatcher;
use crate::error::{FraudError, FraudResult};
use crate::pagination::{Page, PageRequest};
use crate::report::ReportGenerator;
use chrono::{DateTime, Utc};
use finsys_common::db::{TransactionDraft, TransactionRecord};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudReportResponse {
    pub id: i64,
    pub transaction_id: i64,
    pub report: String,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<FraudReport> for FraudReportResponse {
    fn from(report: FraudReport) -> Self {
        Self {
            id: report.id,
            transaction_id: report.transaction_id,
            report: report.report,
            generated_at: report.generated_at,
            updated_at: report.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FraudReportListResponse {
    pub total: i64,
    pub page: i64,
    pub size: i64,
    pub reports: Vec<FraudReportResponse>,
}

#[derive(Clone)]
pub struct FraudReportService {
    reports: FraudReportRepository,
    transactions: TransactionRepository,
    generator: ReportGenerator,
}

impl FraudReportService {
    pub fn new(
        reports: FraudReportRepository,
        transactions: TransactionRepository,
        generator: ReportGenerator,
    ) -> Self {
        Self {
            reports,
            transactions,
            generator,
        }
    }

    /// Generate and store a report for a transaction that has none
    pub async fn create(&self, transaction_id: i64) -> FraudResult<FraudReportResponse> {
        if transaction_id <= 0 {
            return Err(FraudError::Validation(format!(
                "invalid transaction id {}",
                transaction_id
            )));
        }
        let transaction = self.transactions.get(transaction_id).await?;

        match self.reports.find_by_transaction_id(transaction_id).await {
            Ok(_) => return Err(FraudError::Conflict { transaction_id }),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let content = self.generator.generate(&transaction);
        let report = self.reports.create(transaction_id, content).await?;
        Ok(report.into())
    }

    /// Regenerate the body from the transaction's current fields
    pub async fn update(&self, report_id: i64) -> FraudResult<FraudReportResponse> {
        let existing = self.reports.find_by_id(report_id).await?;
        let transaction = self.transactions.get(existing.transaction_id).await?;
        let content = self.generator.generate(&transaction);
        let report = self.reports.update(report_id, content).await?;
        Ok(report.into())
    }

    pub async fn delete(&self, report_id: i64) -> FraudResult<()> {
        self.reports.delete(report_id).await
    }

    pub async fn get_by_id(&self, report_id: i64) -> FraudResult<FraudReportResponse> {
        Ok(self.reports.find_by_id(report_id).await?.into())
    }

    pub async fn get_by_transaction_id(
        &self,
        transaction_id: i64,
    ) -> FraudResult<FraudReportResponse> {
        Ok(self
            .reports
            .find_by_transaction_id(transaction_id)
            .await?
            .into())
    }

    pub async fn list(&self, page: i64, size: i64) -> FraudResult<FraudReportListResponse> {
        let page = self.reports.list(PageRequest::new(page, size)).await?;
        Ok(FraudReportListResponse {
            total: page.total,
            page: page.page,
            size: page.size,
            reports: page.items.into_iter().map(Into::into).collect(),
        })
    }

    /// Existing report for the transaction, or a freshly generated one
    ///
    /// Losing a creation race to a concurrent caller is resolved by reading
    /// the winner's report.
    pub async fn generate(&self, transaction_id: i64) -> FraudResult<FraudReportResponse> {
        let transaction = self.transactions.get(transaction_id).await?;

        match self.reports.find_by_transaction_id(transaction_id).await {
            Ok(existing) => return Ok(existing.into()),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let content = self.generator.generate(&transaction);
        match self.reports.create(transaction_id, content).await {
            Ok(report) => Ok(report.into()),
            Err(FraudError::Conflict { .. }) => {
                debug!(transaction_id, "Report created concurrently, re-reading");
                self.get_by_transaction_id(transaction_id).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Transaction writes with scoring hand-off
#[derive(Clone)]
pub struct TransactionService {
    transactions: TransactionRepository,
    dispatcher: Arc<ScoringDispatcher>,
}

impl TransactionService {
    pub fn new(transactions: TransactionRepository, dispatcher: Arc<ScoringDispatcher>) -> Self {
        Self {
            transactions,
            dispatcher,
        }
    }

    /// Persist, then enqueue for scoring; the verdict lands later
    pub async fn create(&self, draft: &TransactionDraft) -> FraudResult<TransactionRecord> {
        let record = self.transactions.create(draft).await?;
        self.hand_off(&record).await;
        Ok(record)
    }

    /// Overwrite business fields, then re-score
    pub async fn update(&self, id: i64, draft: &TransactionDraft) -> FraudResult<TransactionRecord> {
        let record = self.transactions.update_business_fields(id, draft).await?;
        self.hand_off(&record).await;
        Ok(record)
    }

    pub async fn delete(&self, id: i64) -> FraudResult<()> {
        self.transactions.soft_delete(id).await
    }

    pub async fn get(&self, id: i64) -> FraudResult<TransactionRecord> {
        self.transactions.get(id).await
    }

    pub async fn list(
        &self,
        filter: &TransactionFilter,
        page: i64,
        size: i64,
    ) -> FraudResult<Page<TransactionRecord>> {
        self.transactions
            .list(filter, PageRequest::new(page, size))
            .await
    }

    /// Re-enqueue an existing transaction for scoring
    pub async fn rescore(&self, id: i64) -> FraudResult<()> {
        let record = self.transactions.get(id).await?;
        self.dispatcher.dispatch(record).await
    }

    /// The write has committed; a dispatch failure only costs the verdict
    async fn hand_off(&self, record: &TransactionRecord) {
        if let Err(e) = self.dispatcher.dispatch(record.clone()).await {
            warn!(
                transaction_id = record.id,
                error = %e,
                "Could not enqueue transaction for scoring"
            );
        }
    }
}
