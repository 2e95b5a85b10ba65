//! Dual-store fraud report persistence
//!
//! Metadata (`id`, `transaction_id`, timestamps, tombstone) lives in the
//! relational `fraud_reports` table; the narrative body lives in the
//! document store keyed by `fraud_report_id`. There is no coordinator
//! between the two, so every write follows the same envelope:
//!
//! 1. begin a relational transaction and stage the metadata change
//! 2. perform the document leg, bounded as a whole by `doc_timeout`
//! 3. on document failure roll the relational transaction back,
//!    otherwise commit
//!
//! The metadata row is authoritative for existence, the document for
//! content. A crash between a successful document write and the relational
//! commit leaves an orphan document; [`FraudReportRepository::sweep_orphan_documents`]
//! removes those after the fact.

use crate::docstore::{DocumentStore, DocumentStoreError, ReportDocument};
use crate::error::{is_unique_violation, FraudError, FraudResult, ReportLookup, StoreError};
use crate::pagination::{Page, PageRequest};
use chrono::{DateTime, Utc};
use finsys_common::time;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A fraud report with its body spliced in from the document store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudReport {
    pub id: i64,
    pub transaction_id: i64,
    pub report: String,
    pub generated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReportMeta {
    id: i64,
    transaction_id: i64,
    generated_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReportMeta {
    fn with_content(self, report: String) -> FraudReport {
        FraudReport {
            id: self.id,
            transaction_id: self.transaction_id,
            report,
            generated_at: self.generated_at,
            updated_at: self.updated_at,
        }
    }
}

/// Outcome of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Documents removed because no live metadata row references them
    pub orphans_deleted: usize,
    /// Orphans left alone because they are younger than the grace period
    pub orphans_pending: usize,
    /// Live metadata rows with no document
    pub missing_documents: Vec<i64>,
}

#[derive(Clone)]
pub struct FraudReportRepository {
    pool: SqlitePool,
    docs: Arc<dyn DocumentStore>,
    doc_timeout: Duration,
}

impl FraudReportRepository {
    pub fn new(pool: SqlitePool, docs: Arc<dyn DocumentStore>, doc_timeout: Duration) -> Self {
        Self {
            pool,
            docs,
            doc_timeout,
        }
    }

    /// Run one document-store operation under the bound
    async fn doc_leg<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, DocumentStoreError>>,
    {
        match tokio::time::timeout(self.doc_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Document(e)),
            Err(_) => Err(StoreError::DocumentTimeout(self.doc_timeout)),
        }
    }

    /// Best-effort removal of a document that may or may not have landed
    ///
    /// Matches the document's own `_id`, so a later report that reused
    /// `report_id` keeps its body.
    async fn discard_document(&self, report_id: i64, doc_id: Uuid) {
        match self.doc_leg(self.docs.delete_document(doc_id)).await {
            Ok(0) => {}
            Ok(n) => warn!(report_id, deleted = n, "Removed document left by failed report write"),
            Err(e) => warn!(
                report_id,
                error = %e,
                "Could not remove document left by failed report write; sweep will collect it"
            ),
        }
    }

    /// Insert metadata and document for a new report
    ///
    /// A live report for the same transaction yields `Conflict`; the
    /// partial unique index enforces it even against concurrent creators.
    /// A leftover document under the freshly allocated id can only belong
    /// to an aborted write, so it is replaced.
    pub async fn create(&self, transaction_id: i64, content: String) -> FraudResult<FraudReport> {
        let now = time::now();
        let millis = time::to_millis(now);

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO fraud_reports (transaction_id, generated_at, updated_at) VALUES (?, ?, ?)",
        )
        .bind(transaction_id)
        .bind(millis)
        .bind(millis)
        .execute(&mut *tx)
        .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => {
                return Err(FraudError::Conflict { transaction_id });
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                return Err(FraudError::TransactionNotFound(transaction_id));
            }
            Err(e) => return Err(e.into()),
        };

        let doc = ReportDocument::new(id, content, now);
        let stored = self
            .doc_leg(async {
                let stale = self.docs.delete(id).await?;
                if stale > 0 {
                    warn!(
                        report_id = id,
                        stale,
                        "Replacing leftover document for reused report id"
                    );
                }
                self.docs.insert(&doc).await
            })
            .await;
        if let Err(e) = stored {
            warn!(
                report_id = id,
                transaction_id,
                error = %e,
                "Document insert failed, rolling back report metadata"
            );
            rollback(tx, id).await;
            // A timed-out insert may still land
            self.discard_document(id, doc.id).await;
            return Err(e.into());
        }

        if let Err(e) = tx.commit().await {
            warn!(
                report_id = id,
                error = %e,
                "Metadata commit failed after document insert"
            );
            self.discard_document(id, doc.id).await;
            return Err(e.into());
        }

        debug!(report_id = id, transaction_id, "Created fraud report");
        Ok(FraudReport {
            id,
            transaction_id,
            report: doc.content,
            generated_at: now,
            updated_at: now,
        })
    }

    /// Replace the body of an existing report
    ///
    /// A live report whose document has gone missing gets the document
    /// re-inserted inside the same envelope.
    pub async fn update(&self, id: i64, content: String) -> FraudResult<FraudReport> {
        let existing = self
            .find_meta_by_id(id)
            .await?
            .ok_or(FraudError::ReportNotFound(ReportLookup::Id(id)))?;

        let now = time::now();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE fraud_reports SET updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(time::to_millis(now))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(FraudError::ReportNotFound(ReportLookup::Id(id)));
        }

        let doc_result = self
            .doc_leg(async {
                if self.docs.update_content(id, &content, now).await? > 0 {
                    return Ok(());
                }
                warn!(report_id = id, "Document missing for live report, re-inserting");
                let mut doc = ReportDocument::new(id, content.clone(), now);
                doc.created_at = existing.generated_at;
                self.docs.insert(&doc).await
            })
            .await;

        if let Err(e) = doc_result {
            warn!(
                report_id = id,
                error = %e,
                "Document update failed, rolling back report metadata"
            );
            rollback(tx, id).await;
            return Err(e.into());
        }

        tx.commit().await?;

        debug!(report_id = id, "Updated fraud report");
        Ok(ReportMeta {
            updated_at: now,
            ..existing
        }
        .with_content(content))
    }

    /// Tombstone the metadata and delete the document
    pub async fn delete(&self, id: i64) -> FraudResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE fraud_reports SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(time::to_millis(time::now()))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(FraudError::ReportNotFound(ReportLookup::Id(id)));
        }

        match self.doc_leg(self.docs.delete(id)).await {
            Ok(0) => debug!(report_id = id, "No document to delete for report"),
            Ok(_) => {}
            Err(e) => {
                warn!(
                    report_id = id,
                    error = %e,
                    "Document delete failed, rolling back report tombstone"
                );
                rollback(tx, id).await;
                return Err(e.into());
            }
        }

        tx.commit().await?;
        debug!(report_id = id, "Deleted fraud report");
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> FraudResult<FraudReport> {
        let meta = self.find_meta_by_id(id).await?;
        self.splice(meta, ReportLookup::Id(id)).await
    }

    pub async fn find_by_transaction_id(&self, transaction_id: i64) -> FraudResult<FraudReport> {
        let row = sqlx::query(
            r#"
            SELECT id, transaction_id, generated_at, updated_at
            FROM fraud_reports
            WHERE transaction_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        let meta = row.as_ref().map(row_to_meta).transpose()?;
        self.splice(meta, ReportLookup::TransactionId(transaction_id))
            .await
    }

    /// Live reports, newest generation first, bodies fetched in one batch
    pub async fn list(&self, page: PageRequest) -> FraudResult<Page<FraudReport>> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM fraud_reports WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            r#"
            SELECT id, transaction_id, generated_at, updated_at
            FROM fraud_reports
            WHERE deleted_at IS NULL
            ORDER BY generated_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(page.size())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let metas = rows
            .iter()
            .map(row_to_meta)
            .collect::<FraudResult<Vec<_>>>()?;
        if metas.is_empty() {
            return Ok(Page::new(page, total, Vec::new()));
        }

        let ids: Vec<i64> = metas.iter().map(|m| m.id).collect();
        let mut bodies: HashMap<i64, String> = self
            .doc_leg(self.docs.find_many(&ids))
            .await?
            .into_iter()
            .map(|doc| (doc.fraud_report_id, doc.content))
            .collect();

        let reports = metas
            .into_iter()
            .map(|meta| {
                let body = bodies.remove(&meta.id).unwrap_or_else(|| {
                    warn!(report_id = meta.id, "Document missing for listed report");
                    String::new()
                });
                meta.with_content(body)
            })
            .collect();

        Ok(Page::new(page, total, reports))
    }

    /// Delete documents with no live metadata row and report the reverse
    ///
    /// Orphans younger than `grace` are left alone, since a create may
    /// still be between its document insert and its commit.
    pub async fn sweep_orphan_documents(&self, grace: Duration) -> FraudResult<SweepSummary> {
        let headers = self.doc_leg(self.docs.list_headers()).await?;
        let live: HashSet<i64> =
            sqlx::query_scalar::<_, i64>("SELECT id FROM fraud_reports WHERE deleted_at IS NULL")
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();

        let cutoff = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|grace| time::now().checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut summary = SweepSummary::default();
        let mut with_document = HashSet::with_capacity(headers.len());
        for header in &headers {
            with_document.insert(header.fraud_report_id);
            if live.contains(&header.fraud_report_id) {
                continue;
            }
            if header.created_at > cutoff {
                summary.orphans_pending += 1;
                continue;
            }
            let deleted = self
                .doc_leg(self.docs.delete(header.fraud_report_id))
                .await?;
            if deleted > 0 {
                debug!(report_id = header.fraud_report_id, "Deleted orphan document");
                summary.orphans_deleted += 1;
            }
        }

        let mut missing: Vec<i64> = live.difference(&with_document).copied().collect();
        missing.sort_unstable();
        for id in &missing {
            warn!(report_id = id, "Live report has no document");
        }
        summary.missing_documents = missing;

        info!(
            orphans_deleted = summary.orphans_deleted,
            orphans_pending = summary.orphans_pending,
            missing_documents = summary.missing_documents.len(),
            "Report reconciliation sweep complete"
        );
        Ok(summary)
    }

    async fn find_meta_by_id(&self, id: i64) -> FraudResult<Option<ReportMeta>> {
        let row = sqlx::query(
            r#"
            SELECT id, transaction_id, generated_at, updated_at
            FROM fraud_reports
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_meta).transpose()
    }

    /// Fetch the body for `meta`; either side missing is `ReportNotFound`
    async fn splice(
        &self,
        meta: Option<ReportMeta>,
        lookup: ReportLookup,
    ) -> FraudResult<FraudReport> {
        let Some(meta) = meta else {
            debug!(%lookup, "Report metadata not found");
            return Err(FraudError::ReportNotFound(lookup));
        };

        match self.doc_leg(self.docs.find_one(meta.id)).await? {
            Some(doc) => Ok(meta.with_content(doc.content)),
            None => {
                warn!(
                    report_id = meta.id,
                    transaction_id = meta.transaction_id,
                    "Document missing behind live report metadata"
                );
                Err(FraudError::ReportNotFound(lookup))
            }
        }
    }
}

async fn rollback(tx: Transaction<'_, Sqlite>, report_id: i64) {
    if let Err(e) = tx.rollback().await {
        warn!(report_id, error = %e, "Rollback of report metadata failed");
    }
}

fn row_to_meta(row: &SqliteRow) -> FraudResult<ReportMeta> {
    Ok(ReportMeta {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        generated_at: time::from_millis(row.try_get("generated_at")?),
        updated_at: time::from_millis(row.try_get("updated_at")?),
    })
}
