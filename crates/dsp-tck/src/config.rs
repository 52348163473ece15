//! Run configuration.
//!
//! Values are layered: built-in defaults, then a TOML file, then environment
//! overrides, then command-line flags. [`TckConfig::validate`] runs last.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use dsp_protocol::Role;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Environment variable overriding [`TckConfig::base_url`].
pub const ENV_BASE_URL: &str = "DSP_TCK_BASE_URL";
/// Environment variable overriding [`TckConfig::role`].
pub const ENV_ROLE: &str = "DSP_TCK_ROLE";
/// Environment variable overriding [`TckConfig::listen_addr`].
pub const ENV_LISTEN_ADDR: &str = "DSP_TCK_LISTEN_ADDR";
/// Environment variable overriding [`TckConfig::public_url`].
pub const ENV_PUBLIC_URL: &str = "DSP_TCK_PUBLIC_URL";
/// Environment variable overriding [`TckConfig::default_callback_timeout`].
pub const ENV_CALLBACK_TIMEOUT_MS: &str = "DSP_TCK_CALLBACK_TIMEOUT_MS";
/// Environment variable overriding [`TckConfig::scenario_timeout`].
pub const ENV_SCENARIO_TIMEOUT_MS: &str = "DSP_TCK_SCENARIO_TIMEOUT_MS";

/// Offer id used when neither the scenario nor the configuration names one.
pub const DEFAULT_OFFER_ID: &str = "tck-offer";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required value was never supplied.
    #[error("required configuration {key} is missing; set it in the config file or via the {env} environment variable")]
    Missing { key: &'static str, env: &'static str },

    #[error("invalid configuration {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything the engine needs to run against one SUT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TckConfig {
    /// Protocol base URL of the SUT. Required.
    pub base_url: String,

    /// Role the engine plays (the SUT plays the other one).
    ///
    /// Default: consumer
    pub role: Role,

    /// Address the counterparty endpoint binds to.
    ///
    /// Default: 127.0.0.1:0 (ephemeral port)
    pub listen_addr: SocketAddr,

    /// Externally reachable URL of the endpoint, when it differs from the
    /// bound address (containers, proxies).
    pub public_url: Option<String>,

    /// AWAIT deadline used when a step does not set one.
    ///
    /// Default: 5s
    #[serde(rename = "callback_timeout_ms", with = "duration_ms")]
    pub default_callback_timeout: Duration,

    /// Wall-clock bound for one scenario.
    ///
    /// Default: 30s
    #[serde(rename = "scenario_timeout_ms", with = "duration_ms")]
    pub scenario_timeout: Duration,

    /// Per-request HTTP timeout for the driver client.
    ///
    /// Default: 10s
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,

    /// How long a terminated exchange no scenario owns stays queryable
    /// before it is reaped.
    ///
    /// Default: 60s
    #[serde(rename = "terminal_retention_ms", with = "duration_ms")]
    pub terminal_retention: Duration,

    /// Answer SUT messages with the default well-behaved reply on exchanges
    /// that carry no script.
    pub auto_respond: bool,

    /// Number of scenarios executed concurrently.
    ///
    /// Default: 1
    pub parallelism: usize,

    /// Offer id used by templates that do not name one.
    pub offer_id: String,

    /// Retry policy for transport-level failures.
    pub retry: RetryPolicy,
}

impl Default for TckConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            role: Role::Consumer,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            public_url: None,
            default_callback_timeout: Duration::from_secs(5),
            scenario_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            terminal_retention: Duration::from_secs(60),
            auto_respond: false,
            parallelism: 1,
            offer_id: DEFAULT_OFFER_ID.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TckConfig {
    /// Defaults with the given SUT base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Parse TOML and validate.
    ///
    /// # Errors
    /// Returns an error if parsing or validation fails.
    pub fn parse_str(input: &str) -> ConfigResult<Self> {
        let parsed = Self::parse_str_unchecked(input)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse TOML without validation, for callers that layer more overrides.
    ///
    /// # Errors
    /// Returns an error if TOML parsing fails.
    pub fn parse_str_unchecked(input: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Read and parse a TOML file without validation.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path_unchecked(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_str_unchecked(&raw)
    }

    /// Defaults overlaid with the process environment, validated.
    ///
    /// # Errors
    /// Returns an error if an override is malformed or validation fails.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns an error if an override cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_BASE_URL) {
            self.base_url = value;
        }
        if let Some(value) = lookup(ENV_ROLE) {
            self.role = value
                .parse()
                .map_err(|message: String| ConfigError::invalid("role", message))?;
        }
        if let Some(value) = lookup(ENV_LISTEN_ADDR) {
            self.listen_addr = value
                .parse()
                .map_err(|e| ConfigError::invalid("listen_addr", format!("{value}: {e}")))?;
        }
        if let Some(value) = lookup(ENV_PUBLIC_URL) {
            self.public_url = Some(value);
        }
        if let Some(value) = lookup(ENV_CALLBACK_TIMEOUT_MS) {
            self.default_callback_timeout = parse_millis("callback_timeout_ms", &value)?;
        }
        if let Some(value) = lookup(ENV_SCENARIO_TIMEOUT_MS) {
            self.scenario_timeout = parse_millis("scenario_timeout_ms", &value)?;
        }
        Ok(())
    }

    /// Check the configuration for internal consistency.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] when `base_url` is empty and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "base_url",
                env: ENV_BASE_URL,
            });
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("base_url", format!("{}: {e}", self.base_url)))?;
        if let Some(public_url) = &self.public_url {
            url::Url::parse(public_url)
                .map_err(|e| ConfigError::invalid("public_url", format!("{public_url}: {e}")))?;
        }
        if self.default_callback_timeout.is_zero() {
            return Err(ConfigError::invalid("callback_timeout_ms", "must be > 0"));
        }
        if self.scenario_timeout.is_zero() {
            return Err(ConfigError::invalid("scenario_timeout_ms", "must be > 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout_ms", "must be > 0"));
        }
        if self.terminal_retention.is_zero() {
            return Err(ConfigError::invalid("terminal_retention_ms", "must be > 0"));
        }
        if self.default_callback_timeout > self.scenario_timeout {
            return Err(ConfigError::invalid(
                "callback_timeout_ms",
                "must not exceed scenario_timeout_ms",
            ));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::invalid("parallelism", "must be > 0"));
        }
        if self.offer_id.is_empty() {
            return Err(ConfigError::invalid("offer_id", "must not be empty"));
        }
        self.retry
            .validate()
            .map_err(|message| ConfigError::invalid("retry", message))
    }

    /// Set the SUT base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the engine's role.
    #[must_use]
    pub const fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the endpoint bind address.
    #[must_use]
    pub const fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the externally reachable endpoint URL.
    #[must_use]
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Set the default AWAIT deadline.
    #[must_use]
    pub const fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.default_callback_timeout = timeout;
        self
    }

    /// Set the scenario timeout.
    #[must_use]
    pub const fn with_scenario_timeout(mut self, timeout: Duration) -> Self {
        self.scenario_timeout = timeout;
        self
    }

    /// Set the driver request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set how long unowned terminated exchanges are retained.
    #[must_use]
    pub const fn with_terminal_retention(mut self, retention: Duration) -> Self {
        self.terminal_retention = retention;
        self
    }

    /// Enable or disable default auto-responses.
    #[must_use]
    pub const fn with_auto_respond(mut self, auto_respond: bool) -> Self {
        self.auto_respond = auto_respond;
        self
    }

    /// Set scenario concurrency.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn parse_millis(key: &'static str, value: &str) -> ConfigResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::invalid(key, format!("{value}: {e}")))
}

/// Serde helper for `Duration` as milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
