//! Relational persistence for transactions and report metadata

pub mod reports;
pub mod transactions;

pub use reports::{FraudReport, FraudReportRepository, SweepSummary};
pub use transactions::{TransactionFilter, TransactionRepository};
