//! Error types for nzb-triage
//!
//! Two families of errors live here:
//! - [`Error`] is what the public API returns. Only whole-batch failures surface
//!   through it (invalid options, the global health-check deadline); per-NZB
//!   problems are folded into the decision instead.
//! - [`NntpError`] and [`InspectError`] are the per-operation errors of the NNTP
//!   layer and the archive inspectors. The orchestrator turns them into blockers
//!   and warnings.

use thiserror::Error;

/// Result type alias for nzb-triage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nzb-triage
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The option that caused the error (e.g., "max_decoded_bytes")
        key: Option<String>,
    },

    /// Invalid NZB payload
    #[error("invalid NZB: {0}")]
    InvalidNzb(String),

    /// NNTP protocol or connection error
    #[error("NNTP error: {0}")]
    Nntp(#[from] NntpError),

    /// Archive inspection failed in a way that could not be mapped to a status
    #[error("inspection error: {0}")]
    Inspect(#[from] InspectError),

    /// The whole batch exceeded `health_check_timeout_ms`
    #[error("HEALTHCHECK_TIMEOUT: triage exceeded {timeout_ms} ms")]
    HealthcheckTimeout {
        /// The deadline that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// A spawned task panicked or was cancelled
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is the global deadline overrun.
    ///
    /// Callers must treat a timed-out batch differently from a batch in which
    /// every NZB was rejected.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::HealthcheckTimeout { .. })
    }
}

/// Errors raised by an NNTP session or the connection pool
#[derive(Debug, Error)]
pub enum NntpError {
    /// The server answered 430 (no such article) or 423
    #[error("article not found: {0}")]
    ArticleNotFound(String),

    /// Unexpected response code
    #[error("unexpected NNTP response {code}: {message}")]
    Protocol {
        /// Three-digit NNTP status code
        code: u16,
        /// Remainder of the status line
        message: String,
    },

    /// AUTHINFO was rejected
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A connect or command exceeded its timeout
    #[error("NNTP operation timed out")]
    Timeout,

    /// The server closed the connection
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or configuration failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// The pool is shutting down and no longer hands out clients
    #[error("NNTP pool is closing")]
    PoolClosing,

    /// No session could be obtained (pool disabled, build failed, ...)
    #[error("no NNTP connection available: {0}")]
    Unavailable(String),
}

impl NntpError {
    /// Check whether this error means the article is missing or expired
    /// (as opposed to a connection or protocol failure).
    pub fn is_missing_article(&self) -> bool {
        match self {
            NntpError::ArticleNotFound(_) => true,
            NntpError::Protocol { code, .. } => *code == 430 || *code == 423,
            _ => false,
        }
    }

    /// Whether the session that produced this error is unusable and must be
    /// replaced.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            NntpError::Timeout
                | NntpError::ConnectionClosed
                | NntpError::Io(_)
                | NntpError::Tls(_)
        )
    }

    /// Short machine-readable code, used in `nntp-error:<kind>` warnings.
    pub fn kind(&self) -> String {
        match self {
            NntpError::ArticleNotFound(_) => "missing".to_string(),
            NntpError::Protocol { code, .. } => format!("protocol-{}", code),
            NntpError::AuthFailed(_) => "auth-failed".to_string(),
            NntpError::Timeout => "timeout".to_string(),
            NntpError::ConnectionClosed => "connection-closed".to_string(),
            NntpError::Io(_) => "io".to_string(),
            NntpError::Tls(_) => "tls".to_string(),
            NntpError::PoolClosing => "pool-closing".to_string(),
            NntpError::Unavailable(_) => "unavailable".to_string(),
        }
    }
}

impl From<nntp_rs::NntpError> for NntpError {
    fn from(e: nntp_rs::NntpError) -> Self {
        use nntp_rs::NntpError as Client;
        match e {
            Client::Io(e) => NntpError::Io(e),
            Client::Tls(message) => NntpError::Tls(message),
            Client::Timeout => NntpError::Timeout,
            Client::ConnectionClosed => NntpError::ConnectionClosed,
            Client::AuthFailed(message) => NntpError::AuthFailed(message),
            Client::NoSuchArticle(id) => NntpError::ArticleNotFound(id),
            Client::Protocol { code, message } if code == 430 || code == 423 => {
                NntpError::ArticleNotFound(message)
            }
            Client::Protocol { code, message } => NntpError::Protocol { code, message },
            Client::EncryptionRequired(message) => NntpError::Protocol { code: 483, message },
            other => NntpError::Protocol {
                code: 0,
                message: other.to_string(),
            },
        }
    }
}

/// Errors raised while walking archive headers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InspectError {
    /// The buffer ended before a complete structure could be read
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the read required
        needed: usize,
        /// Bytes that were left in the buffer
        available: usize,
    },

    /// A structure was present but malformed
    #[error("corrupt header: {0}")]
    Corrupt(String),

    /// Header decryption produced garbage (wrong password or damaged data)
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// A feature this inspector does not handle
    #[error("unsupported: {0}")]
    Unsupported(String),
}
