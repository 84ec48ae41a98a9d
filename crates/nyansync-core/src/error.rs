//! Error types for the sync engine
//!
//! Three layers of failure exist:
//!
//! - [`Error`]: engine-level faults (config store, invalid admin input, unknown jobs).
//!   These are the only errors that leave the executor.
//! - [`ClientError`]: a typed failure returned by one of the remote collaborators
//!   (panel account client, DNS provider, notifier).
//! - [`RunFailure`]: the terminal classification of a failed run. Runs never fail
//!   the process; their failures are data recorded in the job's log.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the sync engine
#[derive(Error, Debug)]
pub enum Error {
    /// Config store errors (read, write, corruption)
    #[error("Config store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A remote collaborator failed outside of a job run
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Job (or other keyed entry) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input from the admin surface
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The scheduler is shutting down and accepts no new work
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error means the requested key does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

/// Typed failure returned by a remote collaborator
///
/// Implementations map transport and HTTP status failures onto these kinds.
/// Messages must never contain credentials or tokens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request did not complete within its time bound
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Credentials or token were rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The remote resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote answered with something we could not interpret
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The remote could not be reached (DNS, connect, TLS, 5xx)
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The remote refused the request for another reason (rate limit, conflict, ...)
    #[error("rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response detail
        message: String,
    },
}

impl ClientError {
    /// Map a non-success HTTP status onto a client error kind
    pub fn from_status(status: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            401 | 403 => Self::Unauthorized(format!("{context} (status {status})")),
            404 => Self::NotFound(format!("{context} (status {status})")),
            408 | 504 => Self::Timeout(format!("{context} (status {status})")),
            500..=599 => Self::Unreachable(format!("{context} (status {status})")),
            _ => Self::Rejected {
                status,
                message: context,
            },
        }
    }

    /// Short machine-friendly name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Malformed(_) => "malformed",
            Self::Unreachable(_) => "unreachable",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Terminal classification of a failed run
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    /// Network failure or timeout talking to the panel or the DNS provider
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Panel credentials or DNS token rejected
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// DNS zone or record absent
    #[error("DNS record not found: {0}")]
    RecordNotFound(String),

    /// No usable primary-inbound device group to take the IP from
    #[error("no primary inbound address: {0}")]
    MissingPrimaryInbound(String),

    /// Remote data could not be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The job definition cannot be used to build a client (bad host, empty token)
    #[error("invalid job definition: {0}")]
    InvalidDefinition(String),
}

impl RunFailure {
    /// Classify a failure of the DNS provider
    ///
    /// Only here does `NotFound` mean the zone or record is absent.
    pub fn from_dns(err: ClientError) -> Self {
        match err {
            ClientError::NotFound(_) => Self::RecordNotFound(err.to_string()),
            err => err.into(),
        }
    }
}

/// Classification of panel failures; a panel 404 is an unavailable endpoint
impl From<ClientError> for RunFailure {
    fn from(err: ClientError) -> Self {
        let message = err.to_string();
        match err {
            ClientError::Timeout(_)
            | ClientError::Unreachable(_)
            | ClientError::NotFound(_)
            | ClientError::Rejected { .. } => Self::RemoteUnavailable(message),
            ClientError::Unauthorized(_) => Self::AuthRejected(message),
            ClientError::Malformed(_) => Self::InvalidResponse(message),
        }
    }
}
