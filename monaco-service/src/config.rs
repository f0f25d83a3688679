use monaco::config::Config as MonacoConfig;
use serde::Deserialize;
use std::fs::File;

const SENTRY_DSN: &str = "SENTRY_DSN";
const STATSD_HOST: &str = "STATSD_HOST";
const STATSD_PORT: &str = "STATSD_PORT";
const DEFAULT_STATSD_PORT: u16 = 8125;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub monaco: Option<MonacoConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Builds the whole configuration from the process environment, the way
    /// the service is configured when deployed next to Keptn.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let metrics = non_empty(STATSD_HOST).map(|statsd_host| MetricsConfig {
            statsd_host,
            statsd_port: non_empty(STATSD_PORT)
                .and_then(|port| port.parse().ok())
                .unwrap_or(DEFAULT_STATSD_PORT),
        });
        let logging = non_empty(SENTRY_DSN).map(|sentry_dsn| LoggingConfig { sentry_dsn });

        Config {
            common: CommonConfig { metrics, logging },
            monaco: Some(MonacoConfig::from_lookup(lookup)),
        }
    }

    /// Loads the file when one is given. A file without a `monaco` section
    /// takes the service settings from the environment.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::from_env());
        };

        let mut config = Self::from_file(path)?;
        if config.monaco.is_none() {
            config.monaco = Some(MonacoConfig::from_env());
        }
        Ok(config)
    }

    pub fn monaco(self) -> MonacoConfig {
        self.monaco.unwrap_or_default()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
