//! Scripted classifiers

use async_trait::async_trait;
use finsys_common::db::TransactionRecord;
use finsys_fraud::classifier::{Classifier, ClassifierError};
use finsys_fraud::FraudVerdict;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Always returns the same remote verdict
pub struct FixedClassifier {
    pub verdict: FraudVerdict,
    pub calls: AtomicU32,
    /// Optional delay before answering
    pub latency: Duration,
}

impl FixedClassifier {
    pub fn new(is_fraud: bool, fraud_probability: f64) -> Self {
        Self {
            verdict: FraudVerdict::remote(is_fraud, fraud_probability),
            calls: AtomicU32::new(0),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn classify(
        &self,
        _transaction: &TransactionRecord,
        _deadline: Duration,
    ) -> Result<FraudVerdict, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.verdict)
    }
}

/// Fails every call as if the service were down
#[derive(Default)]
pub struct FailingClassifier {
    pub calls: AtomicU32,
}

#[async_trait]
impl Classifier for FailingClassifier {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn classify(
        &self,
        _transaction: &TransactionRecord,
        _deadline: Duration,
    ) -> Result<FraudVerdict, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ClassifierError::Connect {
            endpoint: "127.0.0.1:9".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        })
    }
}

/// Never answers and ignores the deadline it is given
pub struct HangingClassifier;

#[async_trait]
impl Classifier for HangingClassifier {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn classify(
        &self,
        _transaction: &TransactionRecord,
        _deadline: Duration,
    ) -> Result<FraudVerdict, ClassifierError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ClassifierError::ServiceError("woke up".to_string()))
    }
}

/// Fails the first `failures` calls, then answers
pub struct FlakyClassifier {
    remaining_failures: AtomicU32,
    verdict: FraudVerdict,
    pub calls: AtomicU32,
}

impl FlakyClassifier {
    pub fn new(failures: u32, verdict: FraudVerdict) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
            verdict,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Classifier for FlakyClassifier {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn classify(
        &self,
        _transaction: &TransactionRecord,
        _deadline: Duration,
    ) -> Result<FraudVerdict, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(ClassifierError::ServiceError("transient".to_string()))
        } else {
            Ok(self.verdict)
        }
    }
}
