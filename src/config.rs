use std::{str::FromStr, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("{0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_username: String,
    pub postgres_password: String,
    pub postgres_db_name: String,
    pub pool_size: u32,
    pub store_timeout: Duration,
    pub http_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let var = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        Ok(Config {
            postgres_host: var("POSTGRES_HOST")?,
            postgres_port: parse("POSTGRES_PORT", &var("POSTGRES_PORT")?)?,
            postgres_username: var("POSTGRES_USERNAME")?,
            postgres_password: var("POSTGRES_PASSWORD")?,
            postgres_db_name: var("POSTGRES_DB_NAME")?,
            pool_size: optional(&lookup, "POSTGRES_POOL_SIZE", 16)?,
            store_timeout: Duration::from_millis(optional(&lookup, "STORE_TIMEOUT_MS", 5000)?),
            http_port: optional(&lookup, "HTTP_PORT", 8080)?,
        })
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.postgres_username,
            self.postgres_password,
            self.postgres_host,
            self.postgres_port,
            self.postgres_db_name
        )
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value
        .parse::<T>()
        .map_err(|e| ConfigError::Invalid(key, e.to_string()))
}

fn optional<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
    T::Err: ToString,
{
    lookup(key).map_or(Ok(default), |value| parse(key, &value))
}
