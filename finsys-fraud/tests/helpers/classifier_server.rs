//! In-process classifier server speaking the binary RPC protocol

use bytes::BytesMut;
use finsys_fraud::classifier::protocol::{
    self, DecodeError, FraudPrediction, TransactionData,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub enum ServerBehavior {
    Predict(FraudPrediction),
    /// Answer under a fixed sequence id instead of echoing the caller's
    PredictAs(i32, FraudPrediction),
    Exception(String),
    /// Raw bytes instead of a reply
    Garbage(Vec<u8>),
    /// Read the call, never answer
    Hang,
}

/// Start a server on an ephemeral port
///
/// Returns its address and the calls it has received.
pub async fn spawn_classifier_server(
    behavior: ServerBehavior,
) -> (SocketAddr, Arc<Mutex<Vec<TransactionData>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));

    let calls = received.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let behavior = behavior.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                let mut buf = BytesMut::with_capacity(1024);
                let (seqid, tx) = loop {
                    match protocol::decode_call(&buf) {
                        Ok((seqid, tx, _)) => break (seqid, tx),
                        Err(DecodeError::Incomplete) => {}
                        Err(DecodeError::Invalid(_)) => return,
                    }
                    match stream.read_buf(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                };
                calls.lock().unwrap().push(tx);

                let reply = match behavior {
                    ServerBehavior::Predict(prediction) => {
                        protocol::encode_reply(seqid, &prediction).to_vec()
                    }
                    ServerBehavior::PredictAs(reply_seqid, prediction) => {
                        protocol::encode_reply(reply_seqid, &prediction).to_vec()
                    }
                    ServerBehavior::Exception(msg) => {
                        protocol::encode_exception(seqid, &msg).to_vec()
                    }
                    ServerBehavior::Garbage(bytes) => bytes,
                    ServerBehavior::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        return;
                    }
                };
                let _ = stream.write_all(&reply).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, received)
}
