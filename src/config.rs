use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub feed: FeedConfig,
    pub audio: AudioConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Dashboard origin allowed by CORS.
    pub frontend_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Capacity of the store's broadcast change channel. A subscriber that
    /// falls further behind than this observes a lag error.
    pub channel_capacity: usize,
    /// How many undelivered notices (toasts) a view keeps before dropping the oldest.
    pub notice_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Sound played for each new unread notification.
    pub alert_url: String,
    /// Near-silent clip played on the first user gesture to unlock playback.
    pub unlock_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of the human readable format.
    pub json: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("PORT", 8080)?,
                frontend_url: env::var("FRONTEND_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/ward.db".to_string()),
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
            },
            feed: FeedConfig {
                channel_capacity: parse_var("FEED_CHANNEL_CAPACITY", 256)?,
                notice_capacity: parse_var("NOTICE_CAPACITY", 20)?,
            },
            audio: AudioConfig {
                alert_url: env::var("AUDIO_ALERT_URL")
                    .unwrap_or_else(|_| "/sounds/notification.mp3".to_string()),
                unlock_url: env::var("AUDIO_UNLOCK_URL")
                    .unwrap_or_else(|_| "/sounds/silence.mp3".to_string()),
            },
            logging: LoggingConfig {
                json: match env::var("LOG_FORMAT") {
                    Ok(v) => v.eq_ignore_ascii_case("json"),
                    Err(_) => false,
                },
            },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                frontend_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/ward.db".to_string(),
                max_connections: 5,
            },
            feed: FeedConfig {
                channel_capacity: 256,
                notice_capacity: 20,
            },
            audio: AudioConfig {
                alert_url: "/sounds/notification.mp3".to_string(),
                unlock_url: "/sounds/silence.mp3".to_string(),
            },
            logging: LoggingConfig { json: false },
        }
    }
}
