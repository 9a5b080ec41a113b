//! Error classification
//!
//! Maps a raw transport outcome onto the fixed [`ErrorKind`] taxonomy and
//! decides what, if anything, may be shown to a user.
//!
//! Error bodies are narrowed through an ordered list of known shapes:
//!
//! 1. JSON:API error array: `{"errors": [{"detail": "...", ...}]}`
//! 2. Message object: `{"message": "..."}`
//! 3. Any other JSON value
//! 4. Raw (non-JSON) text

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{ErrorKind, FetchError, RequestOrigin};
use crate::transport::{HttpResponse, TransportError};

/// Longest user-facing detail before it is truncated
pub const MAX_DISPLAY_LEN: usize = 160;

/// Generic message shown for 5xx responses
pub const SERVER_FAULT_MESSAGE: &str = "Something went wrong on our side. Please try again later.";

/// Everything a call can end with, before classification
#[derive(Debug, Clone)]
pub enum RawOutcome {
    /// No response was received
    Failed(TransportError),
    /// A response with a non-success status
    Response(HttpResponse),
    /// A success response whose body could not be decoded
    Malformed { response: HttpResponse, error: String },
}

impl RawOutcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            RawOutcome::Failed(_) => None,
            RawOutcome::Response(r) | RawOutcome::Malformed { response: r, .. } => Some(r.status),
        }
    }
}

/// Classify a raw outcome
pub fn classify(outcome: &RawOutcome) -> ErrorKind {
    match outcome {
        RawOutcome::Failed(TransportError::Timeout) => ErrorKind::Timeout,
        RawOutcome::Failed(TransportError::Connect(_)) => ErrorKind::Network,
        RawOutcome::Malformed { .. } => ErrorKind::Parse,
        RawOutcome::Response(response) => classify_status(response.status),
    }
}

/// Classify a non-success HTTP status
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        400 => ErrorKind::Validation,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        429 => ErrorKind::RateLimited,
        500..=599 => ErrorKind::ServerFault,
        other => ErrorKind::Custom(other.to_string()),
    }
}

/// One entry of a JSON:API `errors` array
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonApiError {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KnownShape {
    JsonApi { errors: Vec<JsonApiError> },
    Message { message: String },
}

/// A narrowed error body
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    JsonApi(Vec<JsonApiError>),
    Message(String),
    Unknown(Value),
    Raw(String),
    Empty,
}

impl ErrorBody {
    /// Human-readable detail of the first JSON:API error
    pub fn first_detail(&self) -> Option<&str> {
        match self {
            ErrorBody::JsonApi(errors) => errors
                .first()
                .and_then(|e| e.detail.as_deref().or(e.title.as_deref())),
            _ => None,
        }
    }

    /// Serialized dump of the body
    pub fn dump(&self) -> String {
        match self {
            ErrorBody::JsonApi(errors) => {
                let entries: Vec<Value> = errors
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "status": e.status,
                            "code": e.code,
                            "title": e.title,
                            "detail": e.detail,
                        })
                    })
                    .collect();
                serde_json::json!({ "errors": entries }).to_string()
            }
            ErrorBody::Message(message) => serde_json::json!({ "message": message }).to_string(),
            ErrorBody::Unknown(value) => value.to_string(),
            ErrorBody::Raw(text) => text.clone(),
            ErrorBody::Empty => String::new(),
        }
    }
}

/// Narrow a response body to a known shape
pub fn parse_error_body(body: &str) -> ErrorBody {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return ErrorBody::Empty;
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return ErrorBody::Raw(trimmed.to_string());
    };

    match serde_json::from_value::<KnownShape>(value.clone()) {
        Ok(KnownShape::JsonApi { errors }) if !errors.is_empty() => ErrorBody::JsonApi(errors),
        Ok(KnownShape::Message { message }) => ErrorBody::Message(message),
        _ => ErrorBody::Unknown(value),
    }
}

/// Truncate text to [`MAX_DISPLAY_LEN`] characters
pub fn cap_display(text: &str) -> String {
    if text.chars().count() <= MAX_DISPLAY_LEN {
        return text.to_string();
    }
    let mut capped: String = text.chars().take(MAX_DISPLAY_LEN - 1).collect();
    capped.push('…');
    capped
}

/// Turn a raw outcome into a classified [`FetchError`]
pub fn to_fetch_error(endpoint: &str, origin: RequestOrigin, outcome: RawOutcome) -> FetchError {
    let kind = classify(&outcome);
    let mut err = FetchError::new(kind.clone(), endpoint).with_origin(origin);
    if let Some(status) = outcome.status() {
        err = err.with_status(status);
    }

    err = match (&kind, &outcome) {
        (_, RawOutcome::Failed(transport)) => {
            let message = if kind == ErrorKind::Timeout {
                "The request timed out. Please try again."
            } else {
                "Unable to reach the server. Check your connection."
            };
            err.with_display(message).with_detail(transport.to_string())
        }
        (_, RawOutcome::Malformed { error, .. }) => err
            .with_display("Received an unexpected response from the server.")
            .with_detail(format!("malformed body: {}", error)),
        (ErrorKind::ServerFault, RawOutcome::Response(response)) => {
            error!(
                endpoint,
                status = response.status,
                body = %response.body,
                "server fault"
            );
            err.with_display(SERVER_FAULT_MESSAGE)
                .with_detail(format!("HTTP {}", response.status))
        }
        (ErrorKind::Validation | ErrorKind::Forbidden, RawOutcome::Response(response)) => {
            let body = parse_error_body(&response.body);
            let dump = body.dump();
            let display = body.first_detail().map(str::to_string).unwrap_or_else(|| {
                if dump.is_empty() {
                    kind.to_string()
                } else {
                    dump.clone()
                }
            });
            err.with_display(cap_display(&display)).with_detail(dump)
        }
        (_, RawOutcome::Response(response)) => {
            let message = match &kind {
                ErrorKind::Unauthorized => "You are not signed in.".to_string(),
                ErrorKind::NotFound => "The requested resource was not found.".to_string(),
                ErrorKind::RateLimited => {
                    "Too many requests. Please wait a moment and try again.".to_string()
                }
                _ => format!("Request failed with status {}.", response.status),
            };
            err.with_display(message)
                .with_detail(parse_error_body(&response.body).dump())
        }
    };

    // Refresh rejections are expected during logout races
    if origin == RequestOrigin::Refresh && matches!(err.status(), Some(400) | Some(401)) {
        debug!(endpoint, status = ?err.status(), "suppressing refresh rejection from display");
        err = err.suppressed();
    }

    err
}
