//! Error types and their operational classification.

use thiserror::Error;

/// Operational classification of a failure.
///
/// - Transient: worth retrying (timeouts, 5xx, ...)
/// - Permanent: retrying cannot help (broken auth config)
/// - Infrastructure: our own storage/broker failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Auth configuration could not be turned into request data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unsupported auth type `{0}`")]
    UnknownType(String),

    #[error("{auth_type} auth requires `{field}`")]
    MissingField {
        auth_type: &'static str,
        field: &'static str,
    },

    #[error("{auth_type} auth field `{field}` must be {expected}")]
    InvalidField {
        auth_type: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    #[error("target URL `{url}` is not a valid URL: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("header `{name}` has an invalid name or value")]
    InvalidHeader { name: String },
}

/// User-facing transport failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Dns,
    ConnectionRefused,
    Tls,
    Other,
}

impl TransportErrorKind {
    pub fn describe(self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "request timed out",
            TransportErrorKind::Dns => "could not resolve host",
            TransportErrorKind::ConnectionRefused => "connection refused",
            TransportErrorKind::Tls => "TLS handshake failed",
            TransportErrorKind::Other => "network error",
        }
    }
}

/// A delivery attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("auth configuration invalid: {0}")]
    AuthValidation(#[from] AuthError),

    #[error("{}: {message}", .kind.describe())]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    #[error("endpoint responded with HTTP {status}")]
    HttpStatus { status: u16, body_snippet: String },
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::AuthValidation(_) => ErrorKind::Permanent,
            DeliveryError::Transport { .. } | DeliveryError::HttpStatus { .. } => {
                ErrorKind::Transient
            }
        }
    }

    /// Whether the queue should schedule another attempt.
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Ledger persistence failure. Never leaves the ledger implementation.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload snapshot encode/decode failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("unknown delivery status `{0}` in ledger")]
    UnknownStatus(String),
}

/// Queue backend failure.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("broker did not answer within {0:?}")]
    BrokerTimeout(std::time::Duration),

    #[error("job encode/decode failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("queue is shut down")]
    Closed,
}

/// The service could not be assembled.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("http client could not be built: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),
}

impl QueueError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Infrastructure
    }
}
