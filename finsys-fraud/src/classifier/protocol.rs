//! Binary RPC wire format for the fraud classifier
//!
//! Strict binary protocol (version word `0x8001_0000`), unframed, one
//! request and one reply per connection. The service exposes a single
//! method:
//!
//! ```text
//! FraudPrediction predictFraud(1: TransactionData transaction)
//!
//! struct TransactionData {
//!   1: string type,  2: double amount,
//!   3: string nameOrig, 4: double oldBalanceOrig, 5: double newBalanceOrig,
//!   6: string nameDest, 7: double oldBalanceDest, 8: double newBalanceDest,
//!   9: optional string timestamp,
//! }
//!
//! struct FraudPrediction { 1: bool isFraud, 2: double fraudProbability }
//! ```
//!
//! Decoding works on a byte slice and reports [`DecodeError::Incomplete`]
//! when more input is needed, so a caller can keep reading from the socket
//! and retry without tracking partial state.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use finsys_common::db::TransactionRecord;
use thiserror::Error;

pub const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;

pub const METHOD_PREDICT_FRAUD: &str = "predictFraud";

/// Nesting limit when skipping unknown fields
const MAX_SKIP_DEPTH: u32 = 32;

/// Upper bound on any single string or container length
const MAX_LENGTH: usize = 16 * 1024 * 1024;

/// Message type, low byte of the version word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl MessageType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Call),
            2 => Some(MessageType::Reply),
            3 => Some(MessageType::Exception),
            4 => Some(MessageType::Oneway),
            _ => None,
        }
    }
}

/// Field type ids
pub mod ttype {
    pub const STOP: u8 = 0;
    pub const BOOL: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const I16: u8 = 6;
    pub const I32: u8 = 8;
    pub const I64: u8 = 10;
    pub const STRING: u8 = 11;
    pub const STRUCT: u8 = 12;
    pub const MAP: u8 = 13;
    pub const SET: u8 = 14;
    pub const LIST: u8 = 15;
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("message incomplete")]
    Incomplete,

    #[error("{0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> DecodeError {
    DecodeError::Invalid(msg.into())
}

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionData {
    pub tx_type: String,
    pub amount: f64,
    pub name_orig: String,
    pub old_balance_orig: f64,
    pub new_balance_orig: f64,
    pub name_dest: String,
    pub old_balance_dest: f64,
    pub new_balance_dest: f64,
    /// RFC3339, second precision
    pub timestamp: Option<String>,
}

impl TransactionData {
    pub fn from_record(tx: &TransactionRecord) -> Self {
        Self {
            tx_type: tx.tx_type.clone(),
            amount: tx.amount,
            name_orig: tx.name_orig.clone(),
            old_balance_orig: tx.old_balance_orig,
            new_balance_orig: tx.new_balance_orig,
            name_dest: tx.name_dest.clone(),
            old_balance_dest: tx.old_balance_dest,
            new_balance_dest: tx.new_balance_dest,
            timestamp: Some(format_timestamp(tx.created_at)),
        }
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Reply payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FraudPrediction {
    pub is_fraud: bool,
    pub fraud_probability: f64,
}

/// Decoded reply envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Prediction(FraudPrediction),
    /// Application exception, or a result struct with no success field
    Exception(String),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

fn put_message_begin(buf: &mut BytesMut, name: &str, kind: MessageType, seqid: i32) {
    buf.put_u32(VERSION_1 | kind as u32);
    put_string(buf, name);
    buf.put_i32(seqid);
}

fn put_field_begin(buf: &mut BytesMut, field_type: u8, id: i16) {
    buf.put_u8(field_type);
    buf.put_i16(id);
}

fn put_string_field(buf: &mut BytesMut, id: i16, value: &str) {
    put_field_begin(buf, ttype::STRING, id);
    put_string(buf, value);
}

fn put_double_field(buf: &mut BytesMut, id: i16, value: f64) {
    put_field_begin(buf, ttype::DOUBLE, id);
    buf.put_f64(value);
}

fn put_transaction(buf: &mut BytesMut, tx: &TransactionData) {
    put_string_field(buf, 1, &tx.tx_type);
    put_double_field(buf, 2, tx.amount);
    put_string_field(buf, 3, &tx.name_orig);
    put_double_field(buf, 4, tx.old_balance_orig);
    put_double_field(buf, 5, tx.new_balance_orig);
    put_string_field(buf, 6, &tx.name_dest);
    put_double_field(buf, 7, tx.old_balance_dest);
    put_double_field(buf, 8, tx.new_balance_dest);
    if let Some(timestamp) = &tx.timestamp {
        put_string_field(buf, 9, timestamp);
    }
    buf.put_u8(ttype::STOP);
}

/// `predictFraud` CALL message
pub fn encode_call(seqid: i32, tx: &TransactionData) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    put_message_begin(&mut buf, METHOD_PREDICT_FRAUD, MessageType::Call, seqid);
    // args struct
    put_field_begin(&mut buf, ttype::STRUCT, 1);
    put_transaction(&mut buf, tx);
    buf.put_u8(ttype::STOP);
    buf
}

/// `predictFraud` REPLY message carrying a prediction
pub fn encode_reply(seqid: i32, prediction: &FraudPrediction) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    put_message_begin(&mut buf, METHOD_PREDICT_FRAUD, MessageType::Reply, seqid);
    // result struct, field 0 = success
    put_field_begin(&mut buf, ttype::STRUCT, 0);
    put_field_begin(&mut buf, ttype::BOOL, 1);
    buf.put_u8(u8::from(prediction.is_fraud));
    put_double_field(&mut buf, 2, prediction.fraud_probability);
    buf.put_u8(ttype::STOP);
    buf.put_u8(ttype::STOP);
    buf
}

/// EXCEPTION message (application exception, type 6 = internal error)
pub fn encode_exception(seqid: i32, message: &str) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64 + message.len());
    put_message_begin(&mut buf, METHOD_PREDICT_FRAUD, MessageType::Exception, seqid);
    put_string_field(&mut buf, 1, message);
    put_field_begin(&mut buf, ttype::I32, 2);
    buf.put_i32(6);
    buf.put_u8(ttype::STOP);
    buf
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Incomplete)?;
        if end > self.buf.len() {
            return Err(DecodeError::Incomplete);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let len = self.i32()?;
        if len < 0 || len as usize > MAX_LENGTH {
            return Err(invalid(format!("invalid length {}", len)));
        }
        Ok(len as usize)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.length()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("string is not valid UTF-8"))
    }

    /// Returns `None` at STOP
    fn field_begin(&mut self) -> Result<Option<(u8, i16)>, DecodeError> {
        let field_type = self.u8()?;
        if field_type == ttype::STOP {
            return Ok(None);
        }
        Ok(Some((field_type, self.i16()?)))
    }

    fn message_begin(&mut self) -> Result<(String, MessageType, i32), DecodeError> {
        let word = self.i32()? as u32;
        if word & VERSION_MASK != VERSION_1 {
            return Err(invalid(format!("bad protocol version word {:#010x}", word)));
        }
        let kind = MessageType::from_u8((word & 0xff) as u8)
            .ok_or_else(|| invalid(format!("unknown message type {}", word & 0xff)))?;
        let name = self.string()?;
        let seqid = self.i32()?;
        Ok((name, kind, seqid))
    }

    fn skip(&mut self, field_type: u8, depth: u32) -> Result<(), DecodeError> {
        if depth > MAX_SKIP_DEPTH {
            return Err(invalid("nesting too deep"));
        }
        match field_type {
            ttype::BOOL | ttype::BYTE => {
                self.take(1)?;
            }
            ttype::I16 => {
                self.take(2)?;
            }
            ttype::I32 => {
                self.take(4)?;
            }
            ttype::DOUBLE | ttype::I64 => {
                self.take(8)?;
            }
            ttype::STRING => {
                let len = self.length()?;
                self.take(len)?;
            }
            ttype::STRUCT => {
                while let Some((inner, _)) = self.field_begin()? {
                    self.skip(inner, depth + 1)?;
                }
            }
            ttype::MAP => {
                let key_type = self.u8()?;
                let value_type = self.u8()?;
                let len = self.length()?;
                for _ in 0..len {
                    self.skip(key_type, depth + 1)?;
                    self.skip(value_type, depth + 1)?;
                }
            }
            ttype::SET | ttype::LIST => {
                let elem_type = self.u8()?;
                let len = self.length()?;
                for _ in 0..len {
                    self.skip(elem_type, depth + 1)?;
                }
            }
            other => return Err(invalid(format!("unknown field type {}", other))),
        }
        Ok(())
    }

    fn expect_type(field_type: u8, expected: u8, what: &str) -> Result<(), DecodeError> {
        if field_type != expected {
            return Err(invalid(format!(
                "field {} has type {}, expected {}",
                what, field_type, expected
            )));
        }
        Ok(())
    }

    fn prediction(&mut self) -> Result<FraudPrediction, DecodeError> {
        let mut is_fraud = None;
        let mut fraud_probability = None;
        while let Some((field_type, id)) = self.field_begin()? {
            match id {
                1 => {
                    Self::expect_type(field_type, ttype::BOOL, "isFraud")?;
                    is_fraud = Some(self.u8()? != 0);
                }
                2 => {
                    Self::expect_type(field_type, ttype::DOUBLE, "fraudProbability")?;
                    fraud_probability = Some(self.f64()?);
                }
                _ => self.skip(field_type, 0)?,
            }
        }
        Ok(FraudPrediction {
            is_fraud: is_fraud.ok_or_else(|| invalid("missing isFraud"))?,
            fraud_probability: fraud_probability
                .ok_or_else(|| invalid("missing fraudProbability"))?,
        })
    }

    fn application_exception(&mut self) -> Result<String, DecodeError> {
        let mut message = None;
        let mut kind = None;
        while let Some((field_type, id)) = self.field_begin()? {
            match (id, field_type) {
                (1, ttype::STRING) => message = Some(self.string()?),
                (2, ttype::I32) => kind = Some(self.i32()?),
                _ => self.skip(field_type, 0)?,
            }
        }
        Ok(match (message, kind) {
            (Some(msg), Some(kind)) => format!("{} (type {})", msg, kind),
            (Some(msg), None) => msg,
            (None, Some(kind)) => format!("application exception type {}", kind),
            (None, None) => "application exception".to_string(),
        })
    }

    fn transaction(&mut self) -> Result<TransactionData, DecodeError> {
        let mut tx = TransactionData {
            tx_type: String::new(),
            amount: 0.0,
            name_orig: String::new(),
            old_balance_orig: 0.0,
            new_balance_orig: 0.0,
            name_dest: String::new(),
            old_balance_dest: 0.0,
            new_balance_dest: 0.0,
            timestamp: None,
        };
        while let Some((field_type, id)) = self.field_begin()? {
            match (id, field_type) {
                (1, ttype::STRING) => tx.tx_type = self.string()?,
                (2, ttype::DOUBLE) => tx.amount = self.f64()?,
                (3, ttype::STRING) => tx.name_orig = self.string()?,
                (4, ttype::DOUBLE) => tx.old_balance_orig = self.f64()?,
                (5, ttype::DOUBLE) => tx.new_balance_orig = self.f64()?,
                (6, ttype::STRING) => tx.name_dest = self.string()?,
                (7, ttype::DOUBLE) => tx.old_balance_dest = self.f64()?,
                (8, ttype::DOUBLE) => tx.new_balance_dest = self.f64()?,
                (9, ttype::STRING) => tx.timestamp = Some(self.string()?),
                _ => self.skip(field_type, 0)?,
            }
        }
        Ok(tx)
    }
}

/// Decode a reply to the call with `expected_seqid`
///
/// On success returns the reply and the number of bytes consumed.
pub fn decode_reply(buf: &[u8], expected_seqid: i32) -> Result<(Reply, usize), DecodeError> {
    let mut reader = Reader::new(buf);
    let (name, kind, seqid) = reader.message_begin()?;
    if name != METHOD_PREDICT_FRAUD {
        return Err(invalid(format!("unexpected method name {:?}", name)));
    }
    if seqid != expected_seqid {
        return Err(invalid(format!(
            "sequence id mismatch: sent {}, received {}",
            expected_seqid, seqid
        )));
    }

    let reply = match kind {
        MessageType::Reply => {
            let mut prediction = None;
            while let Some((field_type, id)) = reader.field_begin()? {
                if id == 0 && field_type == ttype::STRUCT {
                    prediction = Some(reader.prediction()?);
                } else {
                    reader.skip(field_type, 0)?;
                }
            }
            match prediction {
                Some(p) => Reply::Prediction(p),
                None => Reply::Exception("reply carried no result".to_string()),
            }
        }
        MessageType::Exception => Reply::Exception(reader.application_exception()?),
        other => return Err(invalid(format!("unexpected message type {:?}", other))),
    };
    Ok((reply, reader.pos))
}

/// Decode a `predictFraud` call (server side)
///
/// Returns the sequence id, the transaction and the bytes consumed.
pub fn decode_call(buf: &[u8]) -> Result<(i32, TransactionData, usize), DecodeError> {
    let mut reader = Reader::new(buf);
    let (name, kind, seqid) = reader.message_begin()?;
    if kind != MessageType::Call && kind != MessageType::Oneway {
        return Err(invalid(format!("expected a call, got {:?}", kind)));
    }
    if name != METHOD_PREDICT_FRAUD {
        return Err(invalid(format!("unknown method {:?}", name)));
    }
    let mut transaction = None;
    while let Some((field_type, id)) = reader.field_begin()? {
        if id == 1 && field_type == ttype::STRUCT {
            transaction = Some(reader.transaction()?);
        } else {
            reader.skip(field_type, 0)?;
        }
    }
    let transaction = transaction.ok_or_else(|| invalid("call carried no transaction"))?;
    Ok((seqid, transaction, reader.pos))
}
