use std::fmt;

use thiserror::Error;

use crate::PersistError;

/// Error returned by every gateway call. `message` is fit for display.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled")
    }

    /// Cancellation is not a failure and must never reach the user.
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    pub fn status(&self) -> Option<u16> {
        match self.kind {
            ErrorKind::Rejected(code) | ErrorKind::Server(code) => Some(code),
            ErrorKind::Unauthorized => Some(401),
            _ => None,
        }
    }
}

impl From<PersistError> for ApiError {
    fn from(err: PersistError) -> Self {
        Self::new(ErrorKind::Storage, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidUrl,
    Network,
    Timeout,
    /// 401; the session has already been torn down by the gateway.
    Unauthorized,
    /// Any other 4xx, usually a validation message.
    Rejected(u16),
    /// 5xx.
    Server(u16),
    Decode,
    Storage,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidUrl => write!(f, "invalid url"),
            ErrorKind::Network => write!(f, "network error"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Unauthorized => write!(f, "unauthorized"),
            ErrorKind::Rejected(code) => write!(f, "rejected with status {code}"),
            ErrorKind::Server(code) => write!(f, "server error {code}"),
            ErrorKind::Decode => write!(f, "malformed response"),
            ErrorKind::Storage => write!(f, "storage error"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The task reached a failed state.
    #[error("{0}")]
    Failed(String),
    #[error("task did not finish after {attempts} status checks")]
    TimedOut { attempts: u32 },
    /// A newer `poll` on the same poller replaced this one.
    #[error("polling was superseded by a newer request")]
    Superseded,
    #[error(transparent)]
    Api(#[from] ApiError),
}
