//! Error types for the verification sources.
//!
//! None of these cross the verification engine boundary; the engine folds
//! every one of them into a [`crate::VerificationOutcome`].

use thiserror::Error;

/// Failures talking to the remote ticket authority
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The authority does not know the identifier (HTTP 404)
    #[error("Ticket {identifier} not found by the authority")]
    NotFound {
        /// Identifier that was looked up
        identifier: String,
    },

    /// The request never produced a response (connect failure, timeout)
    #[error("Ticket authority unreachable: {0}")]
    Unreachable(String),

    /// The authority answered with a status other than 2xx or 404
    #[error("Ticket authority returned status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body, for logs only
        body: String,
    },

    /// The response body did not decode
    #[error("Malformed response from ticket authority: {0}")]
    Malformed(String),

    /// The request URL could not be built
    #[error("Invalid ticket authority URL: {0}")]
    InvalidUrl(String),
}

impl RemoteError {
    /// Whether the authority definitively reported the identifier unknown.
    ///
    /// Every other variant is a transport failure.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Stable label for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unreachable(_) => "unreachable",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::Malformed(_) => "malformed",
            Self::InvalidUrl(_) => "invalid_url",
        }
    }
}

/// Failures of the on-device ticket cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// No cached ticket matches the identifier
    #[error("Ticket {identifier} not found in local cache")]
    NotFound {
        /// Identifier that was searched for
        identifier: String,
    },

    /// The storage slot could not be read or written
    #[error("Cache storage error: {0}")]
    Storage(String),

    /// The slot holds something other than a JSON array of tickets
    #[error("Cache slot is corrupt: {0}")]
    Corrupt(String),

    /// A previous writer panicked while holding the cache lock
    #[error("Cache lock poisoned")]
    Poisoned,
}

impl CacheError {
    /// Returns `true` for [`CacheError::NotFound`]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Rejections from the code resolver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Nothing left after trimming
    #[error("QR code does not contain a ticket identifier")]
    Empty,

    /// Strict mode is on and the identifier is not a UUID
    #[error("Invalid QR code format: {0}")]
    NotUuid(String),
}
