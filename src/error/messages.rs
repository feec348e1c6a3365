//! User-facing text for classified errors.
//!
//! Pure lookups keyed by [`ErrorKind`].

use super::{ErrorKind, ErrorRecord};

/// Returns the message shown to the user for this record.
///
/// API and unknown errors have no canned text and show the record's own
/// message.
pub fn format_message(record: &ErrorRecord) -> String {
    let canned = match record.kind {
        ErrorKind::Authentication => "Authentication error: Please sign in again",
        ErrorKind::Authorization => "You do not have permission to perform this action",
        ErrorKind::SessionExpired => "Your session has expired, please sign in again",
        ErrorKind::Network => "Network error: Please check your connection and try again",
        ErrorKind::Timeout => "The request timed out. Please try again",
        ErrorKind::ValidationError => "There was an issue with the data you provided",
        ErrorKind::NotFound => "The requested resource was not found",
        ErrorKind::RateLimit => "Too many requests. Please try again later",
        ErrorKind::ProviderError => "There was an issue with the cloud provider service",
        ErrorKind::ResourceError => "There was an issue with the cloud resource",
        ErrorKind::ServerError => "Server error: We're working to fix this issue",
        ErrorKind::ApiError | ErrorKind::Unknown => return record.message.clone(),
    };
    canned.to_string()
}

/// Returns the remedial action suggested for this record.
pub fn suggested_action(record: &ErrorRecord) -> &'static str {
    match record.kind {
        ErrorKind::Authentication | ErrorKind::SessionExpired => "Sign in again",
        ErrorKind::Network => "Check your internet connection",
        ErrorKind::RateLimit => "Wait a few minutes and try again",
        ErrorKind::Timeout | ErrorKind::ServerError | ErrorKind::Unknown => "Try again later",
        _ => "Try again",
    }
}

/// Returns the heading used by fallback views.
pub fn error_title(record: &ErrorRecord) -> &'static str {
    match record.kind {
        ErrorKind::Authentication | ErrorKind::SessionExpired => "Authentication Error",
        ErrorKind::Authorization => "Authorization Error",
        ErrorKind::Network | ErrorKind::Timeout => "Connection Error",
        ErrorKind::RateLimit => "Rate Limit Exceeded",
        _ => "Error",
    }
}

/// Returns a short notification title such as "Rate limit" for `RATE_LIMIT`.
pub fn notification_title(kind: ErrorKind) -> String {
    let lower = kind.as_str().to_ascii_lowercase().replace('_', " ");
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
