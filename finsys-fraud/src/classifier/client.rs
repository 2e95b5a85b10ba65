//! TCP client for the remote fraud classifier
//!
//! Opens one connection per call and drops it on every exit path. The
//! caller's deadline bounds connect, write and read together.

use super::protocol::{self, DecodeError, Reply, TransactionData};
use super::{Classifier, ClassifierError};
use crate::verdict::FraudVerdict;
use async_trait::async_trait;
use bytes::BytesMut;
use finsys_common::db::TransactionRecord;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// Every call has its own connection, so the sequence id never advances
const CALL_SEQID: i32 = 1;

pub struct RemoteClassifierClient {
    endpoint: String,
}

impl RemoteClassifierClient {
    /// `endpoint` is `host:port`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    async fn call(&self, data: &TransactionData) -> Result<FraudVerdict, ClassifierError> {
        let mut stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|source| ClassifierError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let request = protocol::encode_call(CALL_SEQID, data);
        stream.write_all(&request).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        loop {
            match protocol::decode_reply(&buf, CALL_SEQID) {
                Ok((reply, _)) => return into_verdict(reply),
                Err(DecodeError::Incomplete) => {}
                Err(DecodeError::Invalid(msg)) => {
                    return Err(ClassifierError::MalformedResponse(msg))
                }
            }

            buf.reserve(READ_CHUNK);
            let n = stream.read_buf(&mut buf).await?;
            if n == 0 {
                return Err(ClassifierError::MalformedResponse(format!(
                    "connection closed after {} bytes of reply",
                    buf.len()
                )));
            }
        }
    }
}

fn into_verdict(reply: Reply) -> Result<FraudVerdict, ClassifierError> {
    match reply {
        Reply::Prediction(prediction) => {
            let p = prediction.fraud_probability;
            if !(0.0..=1.0).contains(&p) {
                return Err(ClassifierError::MalformedResponse(format!(
                    "fraud probability {} outside [0, 1]",
                    p
                )));
            }
            Ok(FraudVerdict::remote(prediction.is_fraud, p))
        }
        Reply::Exception(msg) => Err(ClassifierError::ServiceError(msg)),
    }
}

#[async_trait]
impl Classifier for RemoteClassifierClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn classify(
        &self,
        transaction: &TransactionRecord,
        deadline: Duration,
    ) -> Result<FraudVerdict, ClassifierError> {
        let data = TransactionData::from_record(transaction);
        debug!(
            transaction_id = transaction.id,
            endpoint = %self.endpoint,
            "Calling remote classifier"
        );
        match tokio::time::timeout(deadline, self.call(&data)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::DeadlineExceeded(deadline)),
        }
    }
}
