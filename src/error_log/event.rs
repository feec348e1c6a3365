//! Enriched log events.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Environment;
use crate::error::ErrorRecord;

/// A classified error plus the environment it happened in.
///
/// Built once per logged failure and never mutated afterwards. Serializes to
/// the JSON payload sent to the remote sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// The classified error.
    #[serde(flatten)]
    pub record: ErrorRecord,
    /// Identifier of the logger's session.
    pub session_id: String,
    /// Signed-in user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Location the application was showing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Path component of `url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Client identification string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Application version from configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_version: Option<String>,
    /// Deployment environment.
    pub environment: Environment,
    /// Where in the view tree the failure was captured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_stack: Option<String>,
    /// When the event was built.
    pub client_timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn event() -> LogEvent {
        LogEvent {
            record: ErrorRecord::new(ErrorKind::RateLimit, "Too many requests").with_status(429),
            session_id: "lq2k9x0abc".to_string(),
            user_id: Some("user_42".to_string()),
            url: Some("https://app.costpie.io/schedules".to_string()),
            path: Some("/schedules".to_string()),
            user_agent: None,
            application_version: Some("2.4.1".to_string()),
            environment: Environment::Production,
            component_stack: None,
            client_timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_payload_is_flat_camel_case() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["kind"], "RATE_LIMIT");
        assert_eq!(json["statusCode"], 429);
        assert_eq!(json["sessionId"], "lq2k9x0abc");
        assert_eq!(json["userId"], "user_42");
        assert_eq!(json["environment"], "production");
        assert!(json.get("userAgent").is_none());
        assert!(json.get("record").is_none());
    }
}
