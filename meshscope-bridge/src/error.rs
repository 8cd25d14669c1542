use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("{operation}: no matching response within {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },
    #[error("{operation}: transport failure after {elapsed:?}: {reason}")]
    Transport {
        operation: String,
        elapsed: Duration,
        reason: String,
    },
    #[error("{operation}: rejected by the bridge: {message}")]
    Rejected { operation: String, message: String },
    #[error("{operation}: unexpected payload: {reason}")]
    Decode { operation: String, reason: String },
}

impl ProtocolError {
    pub fn operation(&self) -> &str {
        match self {
            Self::Timeout { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Rejected { operation, .. }
            | Self::Decode { operation, .. } => operation,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub(crate) fn decode(operation: &str, reason: impl ToString) -> Self {
        Self::Decode {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure raised by a transport before the protocol layer adds context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

pub type Result<T> = std::result::Result<T, ProtocolError>;
