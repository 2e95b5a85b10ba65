//! Fraud verdicts
//!
//! A verdict is produced per scoring attempt and consumed immediately to
//! update a transaction row; it is never stored on its own.

use finsys_common::db::ScoringState;
use serde::{Deserialize, Serialize};

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Remote,
    Heuristic,
}

impl VerdictSource {
    /// Scoring state a row enters once this verdict is persisted
    pub fn scoring_state(self) -> ScoringState {
        match self {
            VerdictSource::Remote => ScoringState::ScoredRemote,
            VerdictSource::Heuristic => ScoringState::ScoredHeuristic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudVerdict {
    pub is_fraud: bool,
    /// In [0, 1]
    pub fraud_probability: f64,
    pub source: VerdictSource,
}

impl FraudVerdict {
    pub fn remote(is_fraud: bool, fraud_probability: f64) -> Self {
        Self {
            is_fraud,
            fraud_probability,
            source: VerdictSource::Remote,
        }
    }
}
