//! Error taxonomy for the sync core.

use oracle_sync_types::{Address, Network, OracleSource};

use crate::decoder::FeedStatus;

/// Boxed cause carried by [`OracleError::Parse`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Byte-layout violations found while decoding an account.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("read of {len} bytes at offset {offset} exceeds buffer of {available} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: i128 },
}

/// Errors produced by the transport, connection, decoder and sync layers.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("no alternative endpoint configured for {network}")]
    NoAlternativeEndpoint { network: Network },

    #[error("transport error (HTTP status {status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed RPC response: {0}")]
    MalformedResponse(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("account {0} not found")]
    AccountNotFound(Address),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("account is not a {expected} account (discriminator {found:?})")]
    InvalidAccount {
        expected: OracleSource,
        found: [u8; 8],
    },

    #[error("failed to parse {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("no {oracle} feed configured for {symbol}")]
    NotFound { symbol: String, oracle: OracleSource },

    #[error("{symbol} feed is not usable (status {status:?})")]
    FeedUnavailable { symbol: String, status: FeedStatus },

    #[error("unknown instance {0}")]
    UnknownInstance(String),

    #[error("operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<OracleError>,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl OracleError {
    pub(crate) fn parse(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        OracleError::Parse {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            OracleError::Connection(_) => "CONNECTION_ERROR",
            OracleError::NoAlternativeEndpoint { .. } => "NO_ALTERNATIVE_ENDPOINT",
            OracleError::Transport { .. } => "TRANSPORT_ERROR",
            OracleError::Rpc { .. } => "RPC_ERROR",
            OracleError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            OracleError::Timeout(_) => "TIMEOUT",
            OracleError::RateLimited(_) => "RATE_LIMITED",
            OracleError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            OracleError::InvalidAddress(_) => "INVALID_ADDRESS",
            OracleError::InvalidAccount { .. } => "INVALID_ACCOUNT",
            OracleError::Parse { .. } => "PARSE_ERROR",
            OracleError::NotFound { .. } => "NOT_FOUND",
            OracleError::FeedUnavailable { .. } => "FEED_UNAVAILABLE",
            OracleError::UnknownInstance(_) => "UNKNOWN_INSTANCE",
            OracleError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            OracleError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether a later attempt against the same node could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::Connection(_)
                | OracleError::Transport { .. }
                | OracleError::Rpc { .. }
                | OracleError::MalformedResponse(_)
                | OracleError::Timeout(_)
                | OracleError::RateLimited(_)
        )
    }

    /// The innermost error, looking through retry wrappers.
    pub fn root(&self) -> &OracleError {
        match self {
            OracleError::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<LayoutError> for OracleError {
    fn from(err: LayoutError) -> Self {
        OracleError::parse("account data", err)
    }
}

pub type Result<T, E = OracleError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(OracleError::Timeout("slow".into()).is_retryable());
        assert!(OracleError::RateLimited("429".into()).is_retryable());
        assert!(!OracleError::AccountNotFound(Address::default()).is_retryable());
        assert!(!OracleError::from(LayoutError::OutOfBounds {
            offset: 8,
            len: 8,
            available: 10
        })
        .is_retryable());
    }

    #[test]
    fn test_root_unwraps_retry_wrapper() {
        let err = OracleError::RetriesExhausted {
            attempts: 4,
            source: Box::new(OracleError::Rpc {
                code: -32005,
                message: "node is behind".into(),
            }),
        };
        assert_eq!(err.code(), "RETRIES_EXHAUSTED");
        assert_eq!(err.root().code(), "RPC_ERROR");
        assert!(err.to_string().contains("after 4 attempts"));
    }
}
