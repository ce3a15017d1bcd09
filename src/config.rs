use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

const DEFAULT_STORE_URL: &str = "http://localhost:8000";
const DEFAULT_EVENTS_LOG: &str = "events";
const DEFAULT_STATS_LOG: &str = "stats";

/// Where the event store lives and how long any single HTTP call may take.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub create_missing_logs: bool,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub events_log: String,
    pub store: StoreConfig,
}

/// Where a fresh aggregator (no checkpoint) starts reading the source log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    Origin,
    End,
}

impl FromStr for StartFrom {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "origin" => Ok(StartFrom::Origin),
            "end" => Ok(StartFrom::End),
            other => Err(format!("expected origin or end, got {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub store: StoreConfig,
    pub source_log: String,
    pub sink_log: String,
    pub start_from: StartFrom,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub sink_buffer: usize,
    pub checkpoint_path: Option<PathBuf>,
    pub checkpoint_every: u64,
    pub shutdown_grace: Duration,
}

impl StoreConfig {
    fn from_vars<F>(vars: &Vars<F>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            base_url: parse_store_url(&vars.string("STORE_URL", DEFAULT_STORE_URL))?,
            timeout: vars.millis("STORE_TIMEOUT_MS", 5_000)?,
            create_missing_logs: vars.parse("STORE_CREATE_LOGS", false)?,
        })
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        Ok(Self {
            port: vars.parse("GATEWAY_PORT", 9000)?,
            events_log: vars.log_name("EVENTS_LOG", DEFAULT_EVENTS_LOG)?,
            store: StoreConfig::from_vars(&vars)?,
        })
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let sink_buffer: usize = vars.parse("SINK_BUFFER", 64)?;
        if sink_buffer == 0 {
            return Err(ConfigError::Invalid {
                var: "SINK_BUFFER",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let backoff_initial = vars.millis("BACKOFF_INITIAL_MS", 250)?;
        let backoff_max = vars.millis("BACKOFF_MAX_MS", 30_000)?;
        if backoff_max < backoff_initial {
            return Err(ConfigError::Invalid {
                var: "BACKOFF_MAX_MS",
                value: backoff_max.as_millis().to_string(),
                reason: "must not be lower than BACKOFF_INITIAL_MS".to_string(),
            });
        }

        Ok(Self {
            store: StoreConfig::from_vars(&vars)?,
            source_log: vars.log_name("EVENTS_LOG", DEFAULT_EVENTS_LOG)?,
            sink_log: vars.log_name("STATS_LOG", DEFAULT_STATS_LOG)?,
            start_from: vars.parse("AGGREGATOR_START_FROM", StartFrom::Origin)?,
            connect_timeout: vars.millis("CONNECT_TIMEOUT_MS", 5_000)?,
            idle_timeout: vars.millis("IDLE_TIMEOUT_MS", 30_000)?,
            write_timeout: vars.millis("WRITE_TIMEOUT_MS", 5_000)?,
            backoff_initial,
            backoff_max,
            sink_buffer,
            checkpoint_path: vars.optional("CHECKPOINT_PATH").map(PathBuf::from),
            checkpoint_every: vars.parse("CHECKPOINT_EVERY", 100)?,
            shutdown_grace: vars.millis("SHUTDOWN_GRACE_MS", 5_000)?,
        })
    }
}

/// Only http(s) base URLs are accepted; the WebSocket endpoints are derived from them.
pub fn parse_store_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var: "STORE_URL",
        value: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, var: &str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn millis(&self, var: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
        self.parse(var, default_ms).map(Duration::from_millis)
    }

    fn log_name(&self, var: &'static str, default: &str) -> Result<String, ConfigError> {
        let name = self.string(var, default);
        if name.contains('/') {
            return Err(ConfigError::Invalid {
                var,
                value: name,
                reason: "log names cannot contain '/'".to_string(),
            });
        }
        Ok(name)
    }
}
