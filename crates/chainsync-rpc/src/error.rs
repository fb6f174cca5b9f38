//! Transport-level error types and their retry classification.

use chainsync_core::{RpcErrorKind, SyncError};
use thiserror::Error;

use crate::request::JsonRpcError;

/// JSON-RPC "invalid params".
pub const INVALID_PARAMS: i64 = -32602;

/// Implementation-defined server errors.
pub const SERVER_ERROR_RANGE: std::ops::RangeInclusive<i64> = -32099..=-32000;

/// Errors that can occur during a single RPC round trip.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("Connection failed: {message}")]
    Connect { message: String, dns: bool },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The node answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Any other HTTP-level failure (reset mid-body, redirect loop, ...).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Response body could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Response parsed but did not have the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Map this failure onto the retry taxonomy.
    pub fn kind(&self) -> RpcErrorKind {
        match self {
            Self::Connect { dns: true, .. } => RpcErrorKind::DnsRetry,
            Self::Connect { .. } | Self::Http(_) => RpcErrorKind::Network,
            Self::Timeout { .. } => RpcErrorKind::Timeout,
            Self::HttpStatus { status, .. } => match status {
                408 => RpcErrorKind::Timeout,
                429 | 500..=599 => RpcErrorKind::Server,
                _ => RpcErrorKind::Unknown,
            },
            Self::Rpc(err) => match err.code {
                INVALID_PARAMS => RpcErrorKind::InvalidArgument,
                code if SERVER_ERROR_RANGE.contains(&code) => RpcErrorKind::Server,
                -32700 | -32600 | -32601 => RpcErrorKind::Protocol,
                _ => RpcErrorKind::Unknown,
            },
            Self::Deserialization(_) | Self::Malformed(_) => RpcErrorKind::Protocol,
        }
    }

    /// Returns `true` if this error is transient.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Classify a `reqwest` failure.
    pub fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { ms: timeout_ms }
        } else if err.is_connect() {
            Self::Connect {
                dns: resolver_failed(&err),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Walks the source chain looking for a name resolution failure.
fn resolver_failed(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        let msg = e.to_string().to_ascii_lowercase();
        if msg.contains("dns error")
            || msg.contains("failed to lookup address")
            || msg.contains("name resolution")
        {
            return true;
        }
        current = e.source();
    }
    false
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        SyncError::rpc(err.kind(), err.to_string())
    }
}
