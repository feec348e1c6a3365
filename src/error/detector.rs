//! Pattern detector for exception names and messages.
//!
//! Exceptions carry no status code, so their kind is inferred from text.
//! Patterns are case-insensitive regexes checked in order; a later match
//! overrides an earlier one, which makes timeouts win over generic network
//! wording such as "network timeout".

use std::sync::OnceLock;

use regex::Regex;

use super::ErrorKind;

/// A pattern for matching exception text.
#[derive(Debug)]
pub struct ExceptionPattern {
    regex: Regex,
    kind: ErrorKind,
    description: String,
}

impl ExceptionPattern {
    /// Creates a pattern from a pre-compiled regex.
    pub fn with_regex(regex: Regex, kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            regex,
            kind,
            description: description.into(),
        }
    }

    /// Compiles `pattern`, returning `None` if it is not a valid regex.
    pub fn try_new(pattern: &str, kind: ErrorKind, description: impl Into<String>) -> Option<Self> {
        Regex::new(pattern)
            .ok()
            .map(|regex| Self::with_regex(regex, kind, description))
    }

    /// Returns the kind assigned on match.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks if this pattern matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Infers an [`ErrorKind`] from an exception's name and message.
#[derive(Debug)]
pub struct ExceptionDetector {
    patterns: Vec<ExceptionPattern>,
}

impl Default for ExceptionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ExceptionDetector {
    /// Creates a detector with the network and timeout patterns.
    pub fn new() -> Self {
        Self {
            patterns: Self::default_patterns(),
        }
    }

    /// Creates a detector with custom patterns.
    pub fn with_patterns(patterns: Vec<ExceptionPattern>) -> Self {
        Self { patterns }
    }

    /// Process-wide detector with the default patterns, compiled once.
    pub fn shared() -> &'static ExceptionDetector {
        static DETECTOR: OnceLock<ExceptionDetector> = OnceLock::new();
        DETECTOR.get_or_init(ExceptionDetector::new)
    }

    fn default_patterns() -> Vec<ExceptionPattern> {
        [
            (r"(?i)network", ErrorKind::Network, "Network failure"),
            (r"^TimeoutError$", ErrorKind::Timeout, "Timeout exception name"),
            (r"(?i)timeout", ErrorKind::Timeout, "Timeout wording"),
        ]
        .into_iter()
        .filter_map(|(pattern, kind, description)| {
            ExceptionPattern::try_new(pattern, kind, description)
        })
        .collect()
    }

    /// Returns the patterns in evaluation order.
    pub fn patterns(&self) -> &[ExceptionPattern] {
        &self.patterns
    }

    /// Returns the kind of the last pattern matching either the name or the
    /// message, or `None` when nothing matches.
    pub fn detect(&self, name: &str, message: &str) -> Option<ErrorKind> {
        self.patterns
            .iter()
            .rfind(|p| p.matches(name) || p.matches(message))
            .map(ExceptionPattern::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_compile() {
        let detector = ExceptionDetector::new();
        assert_eq!(detector.patterns().len(), 3);
    }

    #[test]
    fn test_detects_network_case_insensitive() {
        let detector = ExceptionDetector::new();
        assert_eq!(
            detector.detect("TypeError", "Failed to fetch: NETWORK error"),
            Some(ErrorKind::Network)
        );
        assert_eq!(
            detector.detect("NetworkError", "socket closed"),
            Some(ErrorKind::Network)
        );
    }

    #[test]
    fn test_detects_timeout_name() {
        let detector = ExceptionDetector::new();
        assert_eq!(
            detector.detect("TimeoutError", "gave up"),
            Some(ErrorKind::Timeout)
        );
    }

    #[test]
    fn test_timeout_overrides_network() {
        let detector = ExceptionDetector::new();
        assert_eq!(
            detector.detect("Error", "network Timeout while reading"),
            Some(ErrorKind::Timeout)
        );
    }

    #[test]
    fn test_no_match() {
        let detector = ExceptionDetector::new();
        assert_eq!(detector.detect("SyntaxError", "unexpected token"), None);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(ExceptionPattern::try_new("(unclosed", ErrorKind::Network, "bad").is_none());
    }

    #[test]
    fn test_custom_patterns() {
        let pattern =
            ExceptionPattern::try_new(r"(?i)throttl", ErrorKind::RateLimit, "Throttling").unwrap();
        assert_eq!(pattern.description(), "Throttling");
        let detector = ExceptionDetector::with_patterns(vec![pattern]);
        assert_eq!(
            detector.detect("ThrottlingException", "slow down"),
            Some(ErrorKind::RateLimit)
        );
    }
}
