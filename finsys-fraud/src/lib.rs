//! finsys-fraud library interface
//!
//! Transaction fraud scoring and dual-store report persistence. The binary
//! in `main.rs` is a thin CLI over [`app::FraudPipeline`].

pub mod app;
pub mod classifier;
pub mod db;
pub mod dispatcher;
pub mod docstore;
pub mod error;
pub mod heuristic;
pub mod ingest;
pub mod pagination;
pub mod report;
pub mod service;
pub mod verdict;

pub use crate::app::FraudPipeline;
pub use crate::error::{ErrorKind, FraudError, FraudResult, StoreError};
pub use crate::verdict::{FraudVerdict, VerdictSource};
