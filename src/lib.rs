//! CostPie resilience - error handling for the cloud cost dashboard client
//!
//! Failures from the data service and from view rendering are classified
//! into a closed taxonomy ([`error`]), retried with capped exponential
//! backoff ([`retry`]), contained by supervision boundaries that show a
//! fallback and drive recovery ([`boundary`]), and reported to the console
//! and a sampled remote endpoint ([`error_log`]).

pub mod boundary;
pub mod error;
pub mod error_log;
pub mod handler;
pub mod logging;
pub mod navigation;
pub mod retry;

pub use boundary::{BoundaryBuilder, ErrorBoundary, Rendered, Subtree, SupervisionState};
pub use error::{classify, format_message, suggested_action, ErrorKind, ErrorRecord, Failure};
pub use error_log::ErrorLogger;
pub use retry::{is_retryable, next_delay, RetryPolicy};
