//! The stable error-kind vocabulary from spec §7, realized as one enum.
//!
//! Every component in the workspace returns `Result<T, Error>` (or a local
//! error that carries `#[from] Error`) so that the HTTP and WebSocket edges
//! have a single place to map kinds onto status codes / protocol messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("command timed out")]
    CommandTimedOut,

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// Maps an error kind onto the HTTP status code §6 prescribes.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Invalid(_) => 400,
            Error::Unauthenticated => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound => 404,
            Error::Conflict(_) => 409,
            Error::QuotaExceeded(_) => 429,
            Error::AgentUnavailable(_) => 503,
            Error::CommandTimedOut => 504,
            Error::Upstream(_) => 502,
            Error::Internal(_) => 500,
        }
    }

    /// True for errors where a bare retry (after re-reading state) is a
    /// reasonable caller action, per §4.1's failure semantics.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::Upstream(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
