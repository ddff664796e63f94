use serde::{Deserialize, Serialize};

/// Top-level configuration settings for the application.
///
/// Includes settings for the HTTP server, the broker and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the HTTP server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Largest publish body accepted, in bytes.
    pub max_body_bytes: usize,
}

/// Configuration settings for the broker.
///
/// `default_limit` and `default_timeout_ms` apply to consume calls that omit
/// them. `known_topics` is the fixed list returned by topic listing.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub sweep_interval_ms: u64,
    pub default_limit: i64,
    pub default_timeout_ms: i64,
    pub known_topics: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Any subset of settings may be given. Missing values are filled from
/// [`Settings::default`].
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_body_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub sweep_interval_ms: Option<u64>,
    pub default_limit: Option<i64>,
    pub default_timeout_ms: Option<i64>,
    pub known_topics: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: 1_048_576,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 30_000,
            default_limit: 1,
            default_timeout_ms: 15_000,
            known_topics: vec![
                "events".to_string(),
                "commands".to_string(),
                "notifications".to_string(),
            ],
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
                max_body_bytes: server
                    .max_body_bytes
                    .unwrap_or(defaults.server.max_body_bytes),
            },
            broker: BrokerSettings {
                sweep_interval_ms: broker
                    .sweep_interval_ms
                    .unwrap_or(defaults.broker.sweep_interval_ms),
                default_limit: broker
                    .default_limit
                    .unwrap_or(defaults.broker.default_limit),
                default_timeout_ms: broker
                    .default_timeout_ms
                    .unwrap_or(defaults.broker.default_timeout_ms),
                known_topics: broker
                    .known_topics
                    .unwrap_or(defaults.broker.known_topics),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}
