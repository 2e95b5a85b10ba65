//! Database models

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scoring sub-state of a transaction row
///
/// `Unscored -> Scoring -> ScoredRemote | ScoredHeuristic`. A later update of
/// the business fields re-enters `Scoring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringState {
    Unscored,
    Scoring,
    ScoredRemote,
    ScoredHeuristic,
}

impl ScoringState {
    /// Form stored in the `scoring_state` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringState::Unscored => "unscored",
            ScoringState::Scoring => "scoring",
            ScoringState::ScoredRemote => "scored_remote",
            ScoringState::ScoredHeuristic => "scored_heuristic",
        }
    }
}

impl fmt::Display for ScoringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoringState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unscored" => Ok(ScoringState::Unscored),
            "scoring" => Ok(ScoringState::Scoring),
            "scored_remote" => Ok(ScoringState::ScoredRemote),
            "scored_heuristic" => Ok(ScoringState::ScoredHeuristic),
            other => Err(Error::Internal(format!("Unknown scoring state: {}", other))),
        }
    }
}

/// Business fields of a transaction, as handed over by ingestion or an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDraft {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: f64,
    pub name_orig: String,
    pub old_balance_orig: f64,
    pub new_balance_orig: f64,
    pub name_dest: String,
    pub old_balance_dest: f64,
    pub new_balance_dest: f64,
    /// Pre-labelled fraud flag carried by bulk imports
    #[serde(default)]
    pub is_fraud: Option<bool>,
}

impl TransactionDraft {
    /// Check the draft before it may be persisted
    pub fn validate(&self) -> Result<()> {
        if self.tx_type.trim().is_empty() {
            return Err(Error::InvalidInput("transaction type is required".to_string()));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(Error::InvalidInput(
                "transaction amount must be larger than 0".to_string(),
            ));
        }
        if self.name_orig.trim().is_empty() {
            return Err(Error::InvalidInput("originator name is required".to_string()));
        }
        if self.name_dest.trim().is_empty() {
            return Err(Error::InvalidInput("destination name is required".to_string()));
        }
        let balances = [
            self.old_balance_orig,
            self.new_balance_orig,
            self.old_balance_dest,
            self.new_balance_dest,
        ];
        if balances.iter().any(|b| !b.is_finite()) {
            return Err(Error::InvalidInput("balances must be finite numbers".to_string()));
        }
        Ok(())
    }
}

/// A persisted transaction
///
/// `is_fraud` and `fraud_probability` are written only by the scoring
/// dispatcher (or carried in from a pre-labelled import), never by a
/// business-field update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: i64,
    #[serde(rename = "type")]
    pub tx_type: String,
    pub amount: f64,
    pub name_orig: String,
    pub old_balance_orig: f64,
    pub new_balance_orig: f64,
    pub name_dest: String,
    pub old_balance_dest: f64,
    pub new_balance_dest: f64,
    pub is_fraud: bool,
    pub fraud_probability: f64,
    pub scoring_state: ScoringState,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
