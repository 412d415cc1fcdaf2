//! Error types for the synchronization protocol

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Synchronization errors
#[derive(Error, Debug)]
pub enum SyncError {
    // Per-client exchange errors
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Malformed payload: {0:?}")]
    MalformedPayload(String),

    #[error("Unexpected message: {0:?}")]
    UnexpectedMessage(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    // Cycle-level conditions
    #[error("Accept window exhausted: {connected} of {expected} clients connected")]
    AcceptWindowExhausted { connected: usize, expected: usize },

    #[error("All client samples were filtered as outliers")]
    AllSamplesFiltered,

    // Process-level errors
    #[error("Cannot listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Offset store error: {0}")]
    StoreError(String),
}

impl SyncError {
    /// Only a failure to bind the coordinator endpoint aborts a process;
    /// everything else is local to one client or one cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Bind { .. })
    }

    /// Classification used in cycle reports
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::ConnectionTimeout(_) => FailureKind::Timeout,
            SyncError::MalformedPayload(_) | SyncError::UnexpectedMessage(_) => {
                FailureKind::Malformed
            }
            SyncError::Disconnected => FailureKind::Disconnected,
            SyncError::DeliveryFailure(_) => FailureKind::Delivery,
            _ => FailureKind::Transport,
        }
    }
}

/// Why a single client failed to take part in a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// No reply within the response window
    Timeout,
    /// Reply could not be parsed
    Malformed,
    /// Peer closed before replying
    Disconnected,
    /// Adjustment could not be sent
    Delivery,
    /// Any other socket error
    Transport,
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
