//! GTP Error types

use thiserror::Error;

/// GTP Error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GtpError {
    /// Buffer too short for operation
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Invalid header
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid message type
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    /// Invalid version
    #[error("Invalid GTP version: {0}")]
    InvalidVersion(u8),

    /// Encoding error
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Resource exhausted (transaction pool full)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// No transaction matches the given id or correlation key
    #[error("Transaction not found: {0}")]
    XactNotFound(String),

    /// Operation not allowed in the transaction's current state
    #[error("Invalid transaction state: {0}")]
    InvalidXactState(String),

    /// Peer node has no selected remote address
    #[error("GTP node {0} is not connected")]
    NodeNotConnected(u64),

    /// Transport send/receive failure
    #[error("Transport error: {0}")]
    Io(String),
}

impl From<std::io::Error> for GtpError {
    fn from(err: std::io::Error) -> Self {
        GtpError::Io(err.to_string())
    }
}

/// GTP Result type
pub type GtpResult<T> = Result<T, GtpError>;
