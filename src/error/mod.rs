//! Error classification.
//!
//! Normalizes arbitrary failures into [`ErrorRecord`]s tagged with a closed
//! [`ErrorKind`] taxonomy, and provides the per-kind user-facing text.

pub mod classification;
pub mod detector;
pub mod messages;

pub use classification::{
    classify, is_retryable_error, Context, ErrorKind, ErrorRecord, Failure,
    PROVIDER_CODE_PREFIXES, UNKNOWN_ERROR_MESSAGE,
};
pub use detector::{ExceptionDetector, ExceptionPattern};
pub use messages::{error_title, format_message, notification_title, suggested_action};
