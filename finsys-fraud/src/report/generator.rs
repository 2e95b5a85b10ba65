//! Fraud analysis report generation
//!
//! Findings are a pure function of the transaction's fields. Only the
//! rendered text carries a wall-clock "Generated At" line, so compare
//! [`AnalysisReport::findings`] rather than rendered strings when checking
//! determinism.

use chrono::{DateTime, SecondsFormat, Utc};
use finsys_common::config::ReportConfig;
use crate::heuristic::LARGE_AMOUNT_THRESHOLD;
use finsys_common::db::TransactionRecord;
use std::fmt::Write as _;

/// How balance deltas are compared with the amount
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BalanceTolerance {
    /// Bit-exact `!=` on the floating-point delta
    #[default]
    Exact,
    /// Deltas within this absolute distance of the amount match
    Absolute(f64),
}

impl BalanceTolerance {
    pub fn from_config(config: &ReportConfig) -> Self {
        match config.balance_tolerance {
            Some(tolerance) if tolerance > 0.0 => BalanceTolerance::Absolute(tolerance),
            _ => BalanceTolerance::Exact,
        }
    }

    fn mismatch(&self, delta: f64, amount: f64) -> bool {
        match *self {
            BalanceTolerance::Exact => delta != amount,
            BalanceTolerance::Absolute(tolerance) => (delta - amount).abs() > tolerance,
        }
    }
}

/// One anomaly rule that fired
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomaly {
    LargeAmount { amount: f64 },
    /// `delta` is `old_balance_orig - new_balance_orig`
    OriginBalanceMismatch { delta: f64 },
    /// `delta` is `new_balance_dest - old_balance_dest`
    DestinationBalanceMismatch { delta: f64 },
    NegativeOriginBalance,
}

impl Anomaly {
    fn render(&self, out: &mut String) {
        // Writing to a String cannot fail
        let _ = match self {
            Anomaly::LargeAmount { amount } => writeln!(
                out,
                "- **High Risk**: Unusually large transaction amount ({:.2})",
                amount
            ),
            Anomaly::OriginBalanceMismatch { delta } => writeln!(
                out,
                "- **Anomaly**: Originator balance change ({:.2}) does not match transaction amount.",
                delta
            ),
            Anomaly::DestinationBalanceMismatch { delta } => writeln!(
                out,
                "- **Anomaly**: Destination balance change ({:.2}) does not match transaction amount.",
                delta
            ),
            Anomaly::NegativeOriginBalance => {
                writeln!(out, "- **Anomaly**: Originator's new balance is negative.")
            }
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conclusion {
    Fraudulent,
    Normal,
}

/// Structured findings for one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub tx_type: String,
    pub amount: f64,
    pub name_orig: String,
    pub name_dest: String,
    pub anomalies: Vec<Anomaly>,
    pub conclusion: Conclusion,
    pub fraud_probability: f64,
}

impl AnalysisReport {
    /// The substantive findings, without any rendering
    pub fn findings(&self) -> (&[Anomaly], Conclusion) {
        (&self.anomalies, self.conclusion)
    }

    /// Markdown document with header, summary, findings and conclusion
    pub fn render(&self, generated_at: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(512);
        out.push_str("# Transaction Fraud Analysis Report\n\n");

        out.push_str("## Transaction Information\n\n");
        let _ = writeln!(out, "- Transaction Type: {}", self.tx_type);
        let _ = writeln!(out, "- Amount: {:.2}", self.amount);
        let _ = writeln!(out, "- Originator: {}", self.name_orig);
        let _ = writeln!(out, "- Destination: {}\n", self.name_dest);

        out.push_str("## Fraud Risk Analysis\n\n");
        for anomaly in &self.anomalies {
            anomaly.render(&mut out);
        }

        let label = match self.conclusion {
            Conclusion::Fraudulent => "flagged as **FRAUDULENT**",
            Conclusion::Normal => "determined to be **NORMAL**",
        };
        let _ = writeln!(
            out,
            "\n## Conclusion\n\nThis transaction is {} by the system, with a fraud probability of: {:.2}%",
            label,
            self.fraud_probability * 100.0
        );

        let _ = writeln!(
            out,
            "\nGenerated At: {}",
            generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportGenerator {
    tolerance: BalanceTolerance,
}

impl ReportGenerator {
    pub fn new(tolerance: BalanceTolerance) -> Self {
        Self { tolerance }
    }

    pub fn from_config(config: &ReportConfig) -> Self {
        Self::new(BalanceTolerance::from_config(config))
    }

    /// Evaluate every anomaly rule independently
    pub fn analyze(&self, tx: &TransactionRecord) -> AnalysisReport {
        let mut anomalies = Vec::new();

        if tx.amount > LARGE_AMOUNT_THRESHOLD {
            anomalies.push(Anomaly::LargeAmount { amount: tx.amount });
        }

        let origin_delta = tx.old_balance_orig - tx.new_balance_orig;
        if self.tolerance.mismatch(origin_delta, tx.amount) {
            anomalies.push(Anomaly::OriginBalanceMismatch {
                delta: origin_delta,
            });
        }

        let dest_delta = tx.new_balance_dest - tx.old_balance_dest;
        if self.tolerance.mismatch(dest_delta, tx.amount) {
            anomalies.push(Anomaly::DestinationBalanceMismatch { delta: dest_delta });
        }

        if tx.new_balance_orig < 0.0 {
            anomalies.push(Anomaly::NegativeOriginBalance);
        }

        AnalysisReport {
            tx_type: tx.tx_type.clone(),
            amount: tx.amount,
            name_orig: tx.name_orig.clone(),
            name_dest: tx.name_dest.clone(),
            anomalies,
            conclusion: if tx.is_fraud {
                Conclusion::Fraudulent
            } else {
                Conclusion::Normal
            },
            fraud_probability: tx.fraud_probability,
        }
    }

    /// Rendered report stamped with `generated_at`
    pub fn generate_at(&self, tx: &TransactionRecord, generated_at: DateTime<Utc>) -> String {
        self.analyze(tx).render(generated_at)
    }

    /// Rendered report stamped with the current time
    pub fn generate(&self, tx: &TransactionRecord) -> String {
        self.generate_at(tx, Utc::now())
    }
}
