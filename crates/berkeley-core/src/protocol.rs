//! Wire payloads of the request/response protocol
//!
//! One TCP connection per client per cycle, three plain-text steps:
//!
//! | Step | Sender      | Payload                                   |
//! |------|-------------|-------------------------------------------|
//! | 1    | Coordinator | literal `REQUEST_TIME`                    |
//! | 2    | Client      | decimal timestamp (seconds since epoch)   |
//! | 3    | Coordinator | signed decimal adjustment (seconds)       |
//!
//! Payloads carry no terminator. Receivers trim ASCII whitespace.

use bytes::Bytes;

use crate::{SyncError, SyncResult, Timestamp};

/// Request marker sent by the coordinator
pub const REQUEST_TIME: &[u8] = b"REQUEST_TIME";

/// Largest payload either side reads in one step
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Default coordinator port
pub const DEFAULT_PORT: u16 = 5000;

/// A protocol message
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    /// Step 1
    TimeRequest,
    /// Step 2: the client's simulated clock reading
    TimeReply(Timestamp),
    /// Step 3: correction to add to the client's offset
    Adjustment(f64),
}

impl Message {
    /// Serialize to wire bytes
    pub fn encode(&self) -> Bytes {
        match self {
            Message::TimeRequest => Bytes::from_static(REQUEST_TIME),
            Message::TimeReply(t) => Bytes::from(t.as_secs_f64().to_string()),
            Message::Adjustment(a) => Bytes::from(a.to_string()),
        }
    }

    /// Parse step 1. Anything other than the marker is rejected.
    pub fn parse_request(payload: &[u8]) -> SyncResult<()> {
        if trim_ascii_whitespace(payload) == REQUEST_TIME {
            Ok(())
        } else {
            Err(SyncError::UnexpectedMessage(
                String::from_utf8_lossy(payload).into_owned(),
            ))
        }
    }

    /// Parse step 2
    pub fn parse_time_reply(payload: &[u8]) -> SyncResult<Timestamp> {
        parse_decimal(payload).map(Timestamp::from_secs_f64)
    }

    /// Parse step 3
    pub fn parse_adjustment(payload: &[u8]) -> SyncResult<f64> {
        parse_decimal(payload)
    }
}

fn trim_ascii_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !first.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

/// Parse a finite decimal number, ignoring surrounding whitespace.
/// `inf` and `NaN` are rejected.
pub fn parse_decimal(payload: &[u8]) -> SyncResult<f64> {
    let malformed = || SyncError::MalformedPayload(String::from_utf8_lossy(payload).into_owned());

    let text = std::str::from_utf8(payload).map_err(|_| malformed())?;
    let value: f64 = text.trim().parse().map_err(|_| malformed())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(malformed())
    }
}
