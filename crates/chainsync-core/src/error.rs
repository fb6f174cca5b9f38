//! Error types for the sync pipeline.

use thiserror::Error;

/// Classification tag attached to every chain RPC failure.
///
/// The retry policy only looks at this tag; it never inspects messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Connection refused, reset, or otherwise failed at the socket level.
    Network,
    /// The node answered with a server-side failure (HTTP 5xx, JSON-RPC -32000..-32099).
    Server,
    /// The request did not complete in time.
    Timeout,
    /// Name resolution failed temporarily (`EAI_AGAIN`).
    DnsRetry,
    /// The node rejected the request arguments.
    InvalidArgument,
    /// The response did not match the JSON-RPC protocol or the expected shape.
    Protocol,
    /// Anything that could not be classified.
    Unknown,
}

impl RpcErrorKind {
    /// Returns `true` for transient failures worth retrying.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Server | Self::Timeout | Self::DnsRetry
        )
    }
}

impl std::fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network error"),
            Self::Server => write!(f, "server error"),
            Self::Timeout => write!(f, "timeout"),
            Self::DnsRetry => write!(f, "dns retry"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Protocol => write!(f, "protocol error"),
            Self::Unknown => write!(f, "unknown error"),
        }
    }
}

/// Errors that can occur during a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("RPC {kind}: {message}")]
    Rpc { kind: RpcErrorKind, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Block #{number} could not be fetched")]
    MissingBlock { number: u64 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid transfer query: {0}")]
    InvalidFilter(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Build an RPC error with the given classification.
    pub fn rpc(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self::Rpc {
            kind,
            message: message.into(),
        }
    }

    /// Returns `true` if the error is a transient RPC failure.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Rpc { kind, .. } => kind.is_retriable(),
            _ => false,
        }
    }
}
