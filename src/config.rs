use std::{
    env::{self, VarError},
    fmt,
};

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

use crate::channel::ChannelTarget;

const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: u16 = 5432;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_SUBSCRIPTION_PRICE: u32 = 0;

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing.
    #[error("Environment variable {name} is not set")]
    MissingVar {
        /// Variable name.
        name: &'static str,
    },
    /// A variable is not valid unicode.
    #[error("Environment variable {name} is not valid unicode")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
    },
    /// `CHANNEL_ID` could not be parsed.
    #[error("Invalid CHANNEL_ID {0:?}: expected @username or a numeric chat id")]
    InvalidChannel(String),
}

/// Represents the application configuration.
pub struct Config {
    /// The Telegram bot token.
    pub bot_token: String,
    /// The channel invite links are created for. Channel features are off
    /// when unset.
    pub channel: Option<ChannelTarget>,
    /// Monthly price in Telegram Stars shown next to the invite link.
    pub subscription_price: u32,
    /// Database host.
    pub db_host: String,
    /// Database port.
    pub db_port: u16,
    /// Database name.
    pub db_name: String,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Size of the database connection pool.
    pub db_max_connections: u32,
    /// Enables debug logging when `RUST_LOG` is not set.
    pub debug: bool,
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let channel: Option<ChannelTarget> = optional_var("CHANNEL_ID")?
            .filter(|value| !value.trim().is_empty())
            .map(|value| value.parse().map_err(|_| ConfigError::InvalidChannel(value)))
            .transpose()?;

        Ok(Self {
            bot_token: required_var("BOT_TOKEN")?,
            channel,
            subscription_price: parsed_var("SUBSCRIPTION_PRICE", DEFAULT_SUBSCRIPTION_PRICE),
            db_host: optional_var("DB_HOST")?.unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
            db_port: parsed_var("DB_PORT", DEFAULT_DB_PORT),
            db_name: required_var("DB_NAME")?,
            db_user: required_var("DB_USER")?,
            db_password: required_var("DB_PASSWORD")?,
            db_max_connections: parsed_var("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            debug: optional_var("DEBUG")?.is_some_and(|value| is_truthy(&value)),
        })
    }

    /// Connection options for the PostgreSQL database.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .database(&self.db_name)
            .username(&self.db_user)
            .password(&self.db_password)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"<redacted>")
            .field("channel", &self.channel)
            .field("subscription_price", &self.subscription_price)
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("db_max_connections", &self.db_max_connections)
            .field("debug", &self.debug)
            .finish()
    }
}

fn optional_var(name: &'static str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidVar { name }),
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    optional_var(name)?.ok_or(ConfigError::MissingVar { name })
}

fn parsed_var<T: std::str::FromStr>(name: &'static str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
