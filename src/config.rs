use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::anyhow;

use crate::hub::SessionSettings;

/// Process configuration, read from the environment (and `.env` when present).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// A live connection that sends nothing, keepalives included, for this long is dropped.
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    /// Gap between a `new_room` event and the first message of that room.
    pub new_room_message_delay: Duration,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "sqlite://chat.db?mode=rwc".to_owned(),
            db_max_connections: 16,
            idle_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
            new_room_message_delay: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let defaults = Config::default();
        Ok(Config {
            port: var_or("PORT", defaults.port)?,
            database_url: var_or("DATABASE_URL", defaults.database_url)?,
            db_max_connections: var_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            idle_timeout: Duration::from_secs(var_or("WS_IDLE_TIMEOUT_SECS", 60)?),
            write_timeout: Duration::from_secs(var_or("WS_WRITE_TIMEOUT_SECS", 10)?),
            new_room_message_delay: Duration::from_millis(var_or("NEW_ROOM_MESSAGE_DELAY_MS", 500)?),
            shutdown_grace: Duration::from_secs(var_or("SHUTDOWN_GRACE_SECS", 5)?),
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: self.idle_timeout,
            write_timeout: self.write_timeout,
        }
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match dotenv::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}
