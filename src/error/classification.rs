//! Error classification types and the classifier.
//!
//! Any failure that reaches the resiliency layer is first described as a
//! [`Failure`] and then normalized into an [`ErrorRecord`] by [`classify`].
//! Classification is total: every input yields a record and nothing here
//! panics.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::detector::ExceptionDetector;

/// Open key-value bag supplied by the call site.
pub type Context = HashMap<String, String>;

/// Message used when a failure carries no usable text.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred";

/// Error code prefixes that identify cloud-provider SDK errors.
pub const PROVIDER_CODE_PREFIXES: &[&str] = &["AWS", "Azure", "GCP"];

/// Closed taxonomy of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Credentials missing or rejected (HTTP 401).
    Authentication,
    /// Authenticated but not allowed (HTTP 403).
    Authorization,
    /// The user session is no longer valid.
    SessionExpired,
    /// Connectivity failure before a response arrived.
    Network,
    /// The operation did not complete in time.
    Timeout,
    /// Any other non-success HTTP response.
    ApiError,
    /// The request payload was rejected (HTTP 422).
    ValidationError,
    /// The requested resource does not exist (HTTP 404).
    NotFound,
    /// Too many requests (HTTP 429).
    RateLimit,
    /// Error raised by a cloud-provider SDK.
    ProviderError,
    /// Error concerning a specific cloud resource.
    ResourceError,
    /// Server-side failure (HTTP 5xx).
    ServerError,
    /// Nothing more specific could be determined.
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::Authentication,
        ErrorKind::Authorization,
        ErrorKind::SessionExpired,
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::ApiError,
        ErrorKind::ValidationError,
        ErrorKind::NotFound,
        ErrorKind::RateLimit,
        ErrorKind::ProviderError,
        ErrorKind::ResourceError,
        ErrorKind::ServerError,
        ErrorKind::Unknown,
    ];

    /// Wire name of the kind, e.g. `RATE_LIMIT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Authorization => "AUTHORIZATION",
            ErrorKind::SessionExpired => "SESSION_EXPIRED",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::ApiError => "API_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::ProviderError => "PROVIDER_ERROR",
            ErrorKind::ResourceError => "RESOURCE_ERROR",
            ErrorKind::ServerError => "SERVER_ERROR",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Returns false for the kinds that retrying cannot fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Authentication
                | ErrorKind::Authorization
                | ErrorKind::SessionExpired
                | ErrorKind::NotFound
                | ErrorKind::ValidationError
        )
    }

    /// Returns true for the kinds that send the user back to sign-in.
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, ErrorKind::Authentication | ErrorKind::SessionExpired)
    }

    /// Maps an HTTP status code to a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Authentication,
            403 => ErrorKind::Authorization,
            404 => ErrorKind::NotFound,
            422 => ErrorKind::ValidationError,
            429 => ErrorKind::RateLimit,
            s if s >= 500 => ErrorKind::ServerError,
            _ => ErrorKind::ApiError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw failure as seen by the resiliency layer.
///
/// Variants are checked by [`classify`] in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// An already-normalized record.
    Record(Box<ErrorRecord>),
    /// A named exception with a message (IO errors, client errors, panics).
    Exception { name: String, message: String },
    /// An HTTP-like response descriptor.
    Http { status: u16, message: Option<String> },
    /// An error object carrying a string code.
    Coded { code: String, message: Option<String> },
    /// A bare string.
    Text(String),
    /// A value with no recognizable shape.
    Unknown,
}

impl Failure {
    /// Creates an exception failure.
    pub fn exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        Failure::Exception {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an HTTP failure without a message.
    pub fn status(status: u16) -> Self {
        Failure::Http {
            status,
            message: None,
        }
    }

    /// Creates an HTTP failure with a message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Failure::Http {
            status,
            message: Some(message.into()),
        }
    }

    /// Creates a coded failure.
    pub fn coded(code: impl Into<String>, message: Option<String>) -> Self {
        Failure::Coded {
            code: code.into(),
            message,
        }
    }

    /// Describes any standard error as an exception named `Error`.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Failure::exception("Error", err.to_string())
    }

    /// Describes a panic payload caught by `catch_unwind`.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Failure::exception("Panic", message)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Record(record) => write!(f, "{}: {}", record.kind, record.message),
            Failure::Exception { name, message } => write!(f, "{}: {}", name, message),
            Failure::Http { status, message } => match message {
                Some(m) => write!(f, "HTTP {}: {}", status, m),
                None => write!(f, "HTTP {}", status),
            },
            Failure::Coded { code, message } => match message {
                Some(m) => write!(f, "{}: {}", code, m),
                None => f.write_str(code),
            },
            Failure::Text(text) => f.write_str(text),
            Failure::Unknown => f.write_str(UNKNOWN_ERROR_MESSAGE),
        }
    }
}

impl From<ErrorRecord> for Failure {
    fn from(record: ErrorRecord) -> Self {
        Failure::Record(Box::new(record))
    }
}

impl From<&str> for Failure {
    fn from(text: &str) -> Self {
        Failure::Text(text.to_string())
    }
}

impl From<String> for Failure {
    fn from(text: String) -> Self {
        Failure::Text(text)
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        let name = match err.kind() {
            std::io::ErrorKind::TimedOut => "TimeoutError".to_string(),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => "NetworkError".to_string(),
            kind => format!("{:?}", kind),
        };
        Failure::Exception {
            name,
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for Failure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Failure::exception("TimeoutError", err.to_string());
        }
        if let Some(status) = err.status() {
            return Failure::http(status.as_u16(), err.to_string());
        }
        if err.is_connect() || err.is_request() {
            return Failure::exception("NetworkError", err.to_string());
        }
        Failure::exception("Error", err.to_string())
    }
}

/// The normalized representation of any failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Taxonomy tag.
    pub kind: ErrorKind,
    /// Message carried by the cause, or a generic one.
    pub message: String,
    /// Present when the failure came from an HTTP-like response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Whether another attempt may succeed.
    pub retryable: bool,
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
    /// Call-site context.
    #[serde(default)]
    pub context: Context,
    /// The original failure, kept for diagnostics only.
    #[serde(skip)]
    pub cause: Option<Box<Failure>>,
}

impl ErrorRecord {
    /// Creates a record of the given kind; retryability follows the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retryable: kind.is_retryable(),
            timestamp: Utc::now(),
            context: Context::new(),
            cause: None,
        }
    }

    fn unknown() -> Self {
        Self::new(ErrorKind::Unknown, UNKNOWN_ERROR_MESSAGE)
    }

    /// Adds a context key-value pair to the record.
    pub fn add_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    fn merge_context(&mut self, context: Option<&Context>) {
        if let Some(extra) = context {
            for (key, value) in extra {
                self.context.insert(key.clone(), value.clone());
            }
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ErrorRecord {}

/// Normalizes any failure into an [`ErrorRecord`].
///
/// Guards run in a fixed order and the first match wins: existing record,
/// exception, HTTP status, provider code, plain text, then the unknown
/// fallback. The optional `context` is merged into the result.
pub fn classify(cause: impl Into<Failure>, context: Option<&Context>) -> ErrorRecord {
    let cause = cause.into();
    let mut record = match &cause {
        Failure::Record(existing) => {
            let mut record = existing.as_ref().clone();
            record.timestamp = Utc::now();
            record.merge_context(context);
            return record;
        }
        Failure::Exception { name, message } => classify_exception(name, message),
        Failure::Http { status, message } => classify_status(*status, message.as_deref()),
        Failure::Coded { code, message } if is_provider_code(code) => {
            let message = message
                .clone()
                .unwrap_or_else(|| format!("Provider error: {}", code));
            ErrorRecord::new(ErrorKind::ProviderError, message)
                .add_context("provider_error_code", code.clone())
        }
        Failure::Text(text) => ErrorRecord::new(ErrorKind::Unknown, text.clone()),
        Failure::Coded { .. } | Failure::Unknown => ErrorRecord::unknown(),
    };
    record.merge_context(context);
    record.with_cause(cause)
}

/// Classifies the failure and reports whether it is retryable.
pub fn is_retryable_error(cause: impl Into<Failure>) -> bool {
    classify(cause, None).retryable
}

fn classify_exception(name: &str, message: &str) -> ErrorRecord {
    match ExceptionDetector::shared().detect(name, message) {
        Some(ErrorKind::Timeout) => ErrorRecord::new(ErrorKind::Timeout, "Request timed out"),
        Some(ErrorKind::Network) => ErrorRecord::new(
            ErrorKind::Network,
            "Network error: Please check your connection",
        ),
        Some(kind) => ErrorRecord::new(kind, message),
        None if message.is_empty() => ErrorRecord::unknown(),
        None => ErrorRecord::new(ErrorKind::Unknown, message),
    }
}

fn classify_status(status: u16, message: Option<&str>) -> ErrorRecord {
    let message = match message {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => format!("Server responded with status {}", status),
    };
    ErrorRecord::new(ErrorKind::from_status(status), message).with_status(status)
}

fn is_provider_code(code: &str) -> bool {
    PROVIDER_CODE_PREFIXES
        .iter()
        .any(|prefix| code.starts_with(prefix))
}
