//! Heuristic fallback scorer
//!
//! **This is not a model.** It flags any transaction above a fixed amount
//! and nothing else. It exists so that a transaction always ends up with a
//! verdict when the remote classifier cannot be reached, and callers must
//! treat a `Heuristic` verdict as a placeholder rather than an assessment.
//!
//! The heuristic does not estimate a probability: it reports the sentinel
//! `1.0` when it flags a transaction and `0.0` otherwise.

use crate::verdict::{FraudVerdict, VerdictSource};
use finsys_common::db::TransactionRecord;

/// Amounts strictly above this are flagged
pub const LARGE_AMOUNT_THRESHOLD: f64 = 100_000.0;

/// Score a transaction without any I/O. Total: never fails.
pub fn score(transaction: &TransactionRecord) -> FraudVerdict {
    let is_fraud = transaction.amount > LARGE_AMOUNT_THRESHOLD;
    FraudVerdict {
        is_fraud,
        fraud_probability: if is_fraud { 1.0 } else { 0.0 },
        source: VerdictSource::Heuristic,
    }
}
