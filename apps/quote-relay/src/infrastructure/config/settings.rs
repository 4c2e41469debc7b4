//! Relay Configuration Settings
//!
//! Configuration types for the quote relay, loaded from `QUOTE_RELAY_*`
//! environment variables. Unset variables fall back to defaults; set but
//! unparsable ones are rejected.

use std::str::FromStr;
use std::time::Duration;

const PREFIX: &str = "QUOTE_RELAY_";

/// Longest accepted value for any duration setting.
const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port for the quote, health and metrics endpoints.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8090 }
    }
}

/// Quote resolution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Venue assumed when a request names none.
    pub home_venue: String,
    /// Venue that carries option contracts.
    pub derivatives_venue: String,
    /// Deadline for requests that give none.
    pub default_deadline: Duration,
    /// Upper bound on caller-supplied deadlines.
    pub max_deadline: Duration,
    /// Timeout for one candidate probe.
    pub attempt_timeout: Duration,
    /// Freshness window of cached quotes.
    pub cache_ttl: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            home_venue: "NSE".to_string(),
            derivatives_venue: "NFO".to_string(),
            default_deadline: Duration::from_secs(10),
            max_deadline: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(4),
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Price stream settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Price-distribution endpoints, in provider priority order.
    pub feed_urls: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Reconnect attempts before reporting a fatal failure (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Drop an open connection after this long without inbound frames.
    pub idle_timeout: Duration,
    /// Outbound frames held while disconnected.
    pub max_queued_frames: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            feed_urls: Vec::new(),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
            idle_timeout: Duration::from_secs(60),
            max_queued_frames: 1024,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Quote resolution settings.
    pub resolver: ResolverSettings,
    /// Price stream settings.
    pub stream: StreamSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `QUOTE_RELAY_FEED_URLS` is missing or empty, or
    /// any variable holds an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let feed_key = format!("{PREFIX}FEED_URLS");
        let raw_urls = env
            .get("FEED_URLS")
            .ok_or_else(|| ConfigError::MissingEnvVar(feed_key.clone()))?;
        let feed_urls: Vec<String> = raw_urls
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();
        if feed_urls.is_empty() {
            return Err(ConfigError::EmptyValue(feed_key));
        }

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            http_port: env.parse("HTTP_PORT", server_defaults.http_port)?,
        };

        let resolver_defaults = ResolverSettings::default();
        let resolver = ResolverSettings {
            home_venue: env.venue("HOME_VENUE", &resolver_defaults.home_venue),
            derivatives_venue: env.venue("DERIVATIVES_VENUE", &resolver_defaults.derivatives_venue),
            default_deadline: env.millis("DEADLINE_MS", resolver_defaults.default_deadline)?,
            max_deadline: env.millis("MAX_DEADLINE_MS", resolver_defaults.max_deadline)?,
            attempt_timeout: env.millis("ATTEMPT_TIMEOUT_MS", resolver_defaults.attempt_timeout)?,
            cache_ttl: env.secs("CACHE_TTL_SECS", resolver_defaults.cache_ttl)?,
        };

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            feed_urls,
            reconnect_delay_initial: env.millis(
                "RECONNECT_DELAY_INITIAL_MS",
                stream_defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env
                .secs("RECONNECT_DELAY_MAX_SECS", stream_defaults.reconnect_delay_max)?,
            reconnect_delay_multiplier: env.parse(
                "RECONNECT_DELAY_MULTIPLIER",
                stream_defaults.reconnect_delay_multiplier,
            )?,
            max_reconnect_attempts: env
                .parse("MAX_RECONNECT_ATTEMPTS", stream_defaults.max_reconnect_attempts)?,
            idle_timeout: env.secs("IDLE_TIMEOUT_SECS", stream_defaults.idle_timeout)?,
            max_queued_frames: env.parse("MAX_QUEUED_FRAMES", stream_defaults.max_queued_frames)?,
        };

        Ok(Self {
            server,
            resolver,
            stream,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    Invalid {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{PREFIX}{name}"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: format!("{PREFIX}{name}"),
                value,
            }),
        }
    }

    fn millis(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        let value = self
            .parse::<u64>(name, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))
            .map(Duration::from_millis)?;
        self.bounded(name, value)
    }

    fn secs(&self, name: &str, default: Duration) -> Result<Duration, ConfigError> {
        let value = self
            .parse::<u64>(name, default.as_secs())
            .map(Duration::from_secs)?;
        self.bounded(name, value)
    }

    fn bounded(&self, name: &str, value: Duration) -> Result<Duration, ConfigError> {
        if value > MAX_DURATION {
            return Err(ConfigError::Invalid {
                key: format!("{PREFIX}{name}"),
                value: self.get(name).unwrap_or_default(),
            });
        }
        Ok(value)
    }

    fn venue(&self, name: &str, default: &str) -> String {
        self.get(name)
            .map_or_else(|| default.to_string(), |venue| venue.to_uppercase())
    }
}
