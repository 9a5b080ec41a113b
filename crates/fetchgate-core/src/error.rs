//! Classified request errors
//!
//! Every terminal failure that reaches a caller is a [`FetchError`] carrying
//! one [`ErrorKind`]. The kind drives control flow; the optional display
//! message is what a user interface may show.

use std::fmt;

use thiserror::Error;

/// Fixed taxonomy of request failures
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response was received
    Network,
    /// The transport did not resolve within the request timeout
    Timeout,
    /// A response arrived but its body could not be decoded
    Parse,
    /// HTTP 400
    Validation,
    /// HTTP 401
    Unauthorized,
    /// HTTP 403
    Forbidden,
    /// HTTP 404
    NotFound,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerFault,
    /// Any other status, carried as its decimal string
    Custom(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "network"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Unauthorized => write!(f, "unauthorized"),
            ErrorKind::Forbidden => write!(f, "forbidden"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::RateLimited => write!(f, "rate limited"),
            ErrorKind::ServerFault => write!(f, "server fault"),
            ErrorKind::Custom(code) => write!(f, "status {}", code),
        }
    }
}

/// Which kind of call produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    /// An ordinary API request
    Request,
    /// The token refresh call
    Refresh,
}

/// Message shown when the session cannot be recovered
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please sign in again.";

/// A classified, terminal request failure
#[derive(Debug, Clone, Error)]
#[error("{kind} error from '{endpoint}': {detail}")]
pub struct FetchError {
    kind: ErrorKind,
    status: Option<u16>,
    endpoint: String,
    origin: RequestOrigin,
    display: Option<String>,
    detail: String,
    terminated: bool,
}

impl FetchError {
    pub fn new(kind: ErrorKind, endpoint: impl Into<String>) -> Self {
        let detail = kind.to_string();
        Self {
            kind,
            status: None,
            endpoint: endpoint.into(),
            origin: RequestOrigin::Request,
            display: None,
            detail,
            terminated: false,
        }
    }

    /// Unauthorized error signalling that re-authentication failed and the
    /// caller must return to a logged-out state
    pub fn session_terminated(endpoint: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, endpoint)
            .with_status(401)
            .with_display(SESSION_EXPIRED_MESSAGE)
            .with_detail("session terminated after failed token refresh")
            .into_terminated()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_origin(mut self, origin: RequestOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_display(mut self, message: impl Into<String>) -> Self {
        self.display = Some(message.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Hide the error from user-facing display, keeping its kind
    pub fn suppressed(mut self) -> Self {
        self.display = None;
        self
    }

    fn into_terminated(mut self) -> Self {
        self.terminated = true;
        self
    }

    /// Rebind this error to another endpoint (used when a refresh failure
    /// is reported to the requests that were waiting on it)
    pub fn for_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn origin(&self) -> RequestOrigin {
        self.origin
    }

    /// Message suitable for end users, `None` when the error must not be shown
    pub fn display_message(&self) -> Option<&str> {
        self.display.as_deref()
    }

    /// Internal description for logs
    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::Unauthorized
    }

    pub fn is_session_terminated(&self) -> bool {
        self.terminated
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
