//! Error logger configuration.
//!
//! Configuration can be built in code, derived from the deployment
//! environment, or loaded from a TOML file with `COSTPIE__*` environment
//! variable overrides.

use std::fmt;
use std::path::Path;

use config::{Config, ConfigError, Environment as EnvSource, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deployment environment the application runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development build.
    Development,
    /// Pre-production deployment.
    Staging,
    /// Production deployment.
    Production,
}

impl Environment {
    /// Environment implied by the build profile.
    pub fn current() -> Self {
        if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    /// Lowercase name of the environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when loading logger configuration.
#[derive(Debug, Error)]
pub enum LoggerConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ConfigError),

    /// The configuration file path is invalid.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// The sample rate is outside `[0, 1]`.
    #[error("sample rate must be between 0 and 1, got {0}")]
    InvalidSampleRate(f64),
}

/// Configuration for the error logger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggerConfig {
    /// Whether the console sink is enabled outside development.
    pub console_enabled: bool,
    /// Whether events are forwarded to the remote sink.
    pub remote_enabled: bool,
    /// Probability in `[0, 1]` that an event is forwarded remotely.
    pub sample_rate: f64,
    /// Deployment environment.
    pub environment: Environment,
    /// Application version attached to every event.
    pub application_version: Option<String>,
    /// Endpoint the HTTP remote sink posts to.
    pub remote_endpoint: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::for_environment(Environment::current())
    }
}

/// File representation; unset keys take the environment's defaults.
#[derive(Debug, Default, Deserialize)]
struct RawLoggerConfig {
    console_enabled: Option<bool>,
    remote_enabled: Option<bool>,
    sample_rate: Option<f64>,
    environment: Option<Environment>,
    application_version: Option<String>,
    remote_endpoint: Option<String>,
}

impl LoggerConfig {
    /// Defaults for an environment: remote logging and 10% sampling in
    /// staging and production, console only with full sampling in
    /// development.
    pub fn for_environment(environment: Environment) -> Self {
        let deployed = environment != Environment::Development;
        Self {
            console_enabled: true,
            remote_enabled: deployed,
            sample_rate: if deployed { 0.1 } else { 1.0 },
            environment,
            application_version: None,
            remote_endpoint: None,
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// Values may be overridden by `COSTPIE__*` environment variables, e.g.
    /// `COSTPIE__SAMPLE_RATE=0.5`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, or
    /// holds an out-of-range sample rate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, LoggerConfigError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| LoggerConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(LoggerConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::new(path_str, FileFormat::Toml))
            .add_source(
                EnvSource::with_prefix("COSTPIE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_raw(config.try_deserialize()?)
    }

    /// Parse configuration from TOML text, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or holds an
    /// out-of-range sample rate.
    pub fn from_toml_str(text: &str) -> Result<Self, LoggerConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        Self::from_raw(config.try_deserialize()?)
    }

    fn from_raw(raw: RawLoggerConfig) -> Result<Self, LoggerConfigError> {
        let defaults = Self::for_environment(raw.environment.unwrap_or_default());
        Self {
            console_enabled: raw.console_enabled.unwrap_or(defaults.console_enabled),
            remote_enabled: raw.remote_enabled.unwrap_or(defaults.remote_enabled),
            sample_rate: raw.sample_rate.unwrap_or(defaults.sample_rate),
            environment: defaults.environment,
            application_version: raw.application_version,
            remote_endpoint: raw.remote_endpoint,
        }
        .validated()
    }

    /// Checks that the sample rate is a probability.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerConfigError::InvalidSampleRate`] otherwise.
    pub fn validated(self) -> Result<Self, LoggerConfigError> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(LoggerConfigError::InvalidSampleRate(self.sample_rate));
        }
        Ok(self)
    }

    /// Sets whether the console sink is enabled.
    pub fn with_console_enabled(mut self, enabled: bool) -> Self {
        self.console_enabled = enabled;
        self
    }

    /// Sets whether the remote sink is enabled.
    pub fn with_remote_enabled(mut self, enabled: bool) -> Self {
        self.remote_enabled = enabled;
        self
    }

    /// Sets the sample rate, clamped to `[0, 1]`.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    /// Sets the environment.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the application version.
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.application_version = Some(version.into());
        self
    }

    /// Sets the remote endpoint.
    pub fn with_remote_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.remote_endpoint = Some(endpoint.into());
        self
    }

    /// The console is always on in development and gated by
    /// `console_enabled` elsewhere.
    pub fn console_active(&self) -> bool {
        self.environment == Environment::Development || self.console_enabled
    }
}
