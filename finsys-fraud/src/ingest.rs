//! Batch ingestion
//!
//! Drafts are committed in fixed-size batches, one relational transaction
//! each, and every committed record is handed to the scoring dispatcher.
//! Dispatch waits for queue capacity, so a slow classifier throttles the
//! load instead of growing the queue without bound.

use crate::db::TransactionRepository;
use crate::dispatcher::ScoringDispatcher;
use crate::error::{FraudError, FraudResult};
use finsys_common::db::TransactionDraft;
use std::io::BufRead;
use std::sync::Arc;
use tracing::{info, warn};

/// Rows per batch when nothing else is configured
pub const DEFAULT_BATCH_SIZE: usize = 90;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub imported: usize,
    pub dispatched: usize,
    /// Input lines skipped before reaching the store
    pub rejected: usize,
}

pub struct IngestionLoader {
    transactions: TransactionRepository,
    dispatcher: Arc<ScoringDispatcher>,
    batch_size: usize,
}

impl IngestionLoader {
    pub fn new(
        transactions: TransactionRepository,
        dispatcher: Arc<ScoringDispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            transactions,
            dispatcher,
            batch_size: if batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
        }
    }

    /// Load validated drafts
    ///
    /// A failed batch stops the load; the error reports how many rows were
    /// committed by earlier batches.
    pub async fn load(&self, drafts: &[TransactionDraft]) -> FraudResult<IngestionSummary> {
        let mut summary = IngestionSummary::default();

        for batch in drafts.chunks(self.batch_size) {
            let records = match self.transactions.create_batch(batch).await {
                Ok(records) => records,
                Err(e) => {
                    return Err(FraudError::Ingestion {
                        committed: summary.imported,
                        source: Box::new(e),
                    })
                }
            };
            summary.imported += records.len();

            for record in records {
                let id = record.id;
                match self.dispatcher.dispatch(record).await {
                    Ok(()) => summary.dispatched += 1,
                    Err(e) => warn!(
                        transaction_id = id,
                        error = %e,
                        "Imported transaction not enqueued for scoring"
                    ),
                }
            }
        }

        info!(
            imported = summary.imported,
            dispatched = summary.dispatched,
            batch_size = self.batch_size,
            "Ingestion complete"
        );
        Ok(summary)
    }

    /// Load newline-delimited JSON drafts
    ///
    /// Blank lines are ignored. Lines that do not parse or fail validation
    /// are skipped with a warning and counted as rejected.
    pub async fn load_jsonl<R: BufRead>(&self, reader: R) -> FraudResult<IngestionSummary> {
        let (drafts, rejected) = parse_jsonl(reader)?;
        let mut summary = self.load(&drafts).await?;
        summary.rejected = rejected;
        Ok(summary)
    }
}

/// Parse and validate drafts; returns the drafts and the rejected count
pub fn parse_jsonl<R: BufRead>(reader: R) -> FraudResult<(Vec<TransactionDraft>, usize)> {
    let mut drafts = Vec::new();
    let mut rejected = 0;

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FraudError::Common(e.into()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let line_no = index + 1;
        let draft: TransactionDraft = match serde_json::from_str(line) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unparseable transaction");
                rejected += 1;
                continue;
            }
        };
        if let Err(e) = draft.validate() {
            warn!(line = line_no, error = %e, "Skipping invalid transaction");
            rejected += 1;
            continue;
        }
        drafts.push(draft);
    }

    Ok((drafts, rejected))
}
