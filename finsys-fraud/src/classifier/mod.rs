//! Remote classifier seam
//!
//! The dispatcher only sees the [`Classifier`] trait. The shipped
//! implementation is [`RemoteClassifierClient`], which speaks the binary RPC
//! protocol in [`protocol`]; tests substitute scripted classifiers.

pub mod client;
pub mod protocol;

pub use client::RemoteClassifierClient;

use crate::verdict::FraudVerdict;
use async_trait::async_trait;
use finsys_common::db::TransactionRecord;
use std::time::Duration;
use thiserror::Error;

/// Classifier errors
///
/// Every variant is treated uniformly as "service unavailable" by the
/// dispatcher; the distinction is kept for logs.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Failed to connect to classifier at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Classifier call exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Classifier I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed classifier response: {0}")]
    MalformedResponse(String),

    #[error("Classifier service error: {0}")]
    ServiceError(String),
}

/// Out-of-process fraud classifier
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short name for log lines
    fn name(&self) -> &'static str;

    /// Classify one transaction; the whole call must finish within `deadline`
    async fn classify(
        &self,
        transaction: &TransactionRecord,
        deadline: Duration,
    ) -> Result<FraudVerdict, ClassifierError>;
}
