//! Fraud analysis reports

pub mod generator;

pub use generator::{AnalysisReport, Anomaly, BalanceTolerance, Conclusion, ReportGenerator};
