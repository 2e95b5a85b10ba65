//! Error types for the fraud pipeline
//!
//! Every variant maps onto one coarse [`ErrorKind`] so a transport layer can
//! translate errors mechanically. `RemoteUnavailable` exists for the
//! classifier seam only; the dispatcher recovers it locally and it never
//! reaches a caller of the report or transaction services.

use crate::classifier::ClassifierError;
use crate::docstore::DocumentStoreError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations
pub type FraudResult<T> = Result<T, FraudError>;

/// Which store leg failed
#[derive(Debug, Error)]
pub enum StoreError {
    /// Relational store (metadata, transactions)
    #[error("Relational store error: {0}")]
    Relational(#[from] sqlx::Error),

    /// Document store (report bodies)
    #[error("Document store error: {0}")]
    Document(#[from] DocumentStoreError),

    /// Document store leg exceeded its bound
    #[error("Document store operation timed out after {0:?}")]
    DocumentTimeout(Duration),
}

/// How a report was looked up, for error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLookup {
    Id(i64),
    TransactionId(i64),
}

impl fmt::Display for ReportLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportLookup::Id(id) => write!(f, "id {}", id),
            ReportLookup::TransactionId(id) => write!(f, "transaction {}", id),
        }
    }
}

/// Pipeline error type
#[derive(Debug, Error)]
pub enum FraudError {
    /// Transaction absent or soft-deleted
    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    /// Report absent or soft-deleted, in either store
    #[error("Fraud report not found: {0}")]
    ReportNotFound(ReportLookup),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote classifier call failed
    #[error("Remote classifier unavailable: {0}")]
    RemoteUnavailable(#[from] ClassifierError),

    /// A store operation failed; any compensating rollback has already run
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    /// A live report already exists for the transaction
    #[error("Fraud report for transaction {transaction_id} already exists")]
    Conflict { transaction_id: i64 },

    /// Scoring queue is at capacity
    #[error("Scoring queue is full")]
    QueueFull,

    /// Scoring dispatcher has been shut down
    #[error("Scoring dispatcher is shut down")]
    QueueClosed,

    /// A batch failed part-way through an ingestion run
    #[error("Ingestion aborted after {committed} committed rows: {source}")]
    Ingestion {
        committed: usize,
        #[source]
        source: Box<FraudError>,
    },

    /// Error from the shared library (configuration, I/O)
    #[error(transparent)]
    Common(finsys_common::Error),
}

/// Coarse error category for transport-layer mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    RemoteUnavailable,
    StoreFailure,
    Conflict,
    Internal,
}

impl FraudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FraudError::TransactionNotFound(_) | FraudError::ReportNotFound(_) => {
                ErrorKind::NotFound
            }
            FraudError::Validation(_) => ErrorKind::Validation,
            FraudError::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
            FraudError::Store(_) => ErrorKind::StoreFailure,
            FraudError::Conflict { .. } => ErrorKind::Conflict,
            FraudError::Ingestion { source, .. } => source.kind(),
            FraudError::QueueFull | FraudError::QueueClosed | FraudError::Common(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<sqlx::Error> for FraudError {
    fn from(err: sqlx::Error) -> Self {
        FraudError::Store(StoreError::Relational(err))
    }
}

impl From<DocumentStoreError> for FraudError {
    fn from(err: DocumentStoreError) -> Self {
        FraudError::Store(StoreError::Document(err))
    }
}

impl From<finsys_common::Error> for FraudError {
    fn from(err: finsys_common::Error) -> Self {
        match err {
            finsys_common::Error::InvalidInput(msg) => FraudError::Validation(msg),
            finsys_common::Error::Database(e) => FraudError::Store(StoreError::Relational(e)),
            other => FraudError::Common(other),
        }
    }
}

/// True when a relational error is a UNIQUE constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
