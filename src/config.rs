//! Service configuration loaded from environment variables.
//!
//! ## Required
//! - `DATABASE_URL` - PostgreSQL connection string
//! - `STRIPE_SECRET_KEY` - payment provider secret key
//!
//! ## Optional
//! - `HOST` - bind address (default: 0.0.0.0)
//! - `PORT` - listen port (default: 8083)
//! - `DATABASE_MAX_CONNECTIONS` - pool size (default: 10)
//! - `STRIPE_API_BASE` - provider base URL (default: https://api.stripe.com)
//! - `PAYMENT_TIMEOUT_SECS` - provider call timeout (default: 15)
//! - `STORE_CURRENCY` - ISO currency code for charges (default: usd)
//! - `NATS_URL` - publish domain events when set

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    pub database_max_connections: u32,
    pub stripe_secret_key: SecretString,
    pub stripe_api_base: String,
    pub payment_timeout: Duration,
    pub currency: String,
    pub nats_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::MissingEnvVar(key));

        let currency = get("STORE_CURRENCY").unwrap_or_else(|| "usd".to_string()).to_ascii_lowercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidEnvVar("STORE_CURRENCY", "expected a three-letter ISO code".to_string()));
        }

        let timeout_secs: u64 = parse(&get, "PAYMENT_TIMEOUT_SECS", 15)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidEnvVar("PAYMENT_TIMEOUT_SECS", "must be at least 1".to_string()));
        }

        Ok(Self {
            database_url: SecretString::from(required("DATABASE_URL")?),
            host: parse(&get, "HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?,
            port: parse(&get, "PORT", 8083)?,
            database_max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            stripe_secret_key: SecretString::from(required("STRIPE_SECRET_KEY")?),
            stripe_api_base: get("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string()),
            payment_timeout: Duration::from_secs(timeout_secs),
            currency,
            nats_url: get("NATS_URL"),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr { SocketAddr::new(self.host, self.port) }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnvVar(key, e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [("DATABASE_URL", "postgres://localhost/music"), ("STRIPE_SECRET_KEY", "sk_test_123")];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8083");
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.stripe_api_base, "https://api.stripe.com");
        assert_eq!(config.payment_timeout, Duration::from_secs(15));
        assert_eq!(config.currency, "usd");
        assert_eq!(config.nats_url, None);
        assert_eq!(config.stripe_secret_key.expose_secret(), "sk_test_123");
    }

    #[test]
    fn test_missing_required() {
        let err = load(&[("DATABASE_URL", "postgres://localhost/music")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("STRIPE_SECRET_KEY")));
        let err = load(&[("DATABASE_URL", " "), REQUIRED[1]]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("DATABASE_URL")));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([("PORT", "9000"), ("HOST", "127.0.0.1"), ("STORE_CURRENCY", "INR"), ("NATS_URL", "nats://bus:4222")]);
        let config = load(&vars).unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:9000");
        assert_eq!(config.currency, "inr");
        assert_eq!(config.nats_url.as_deref(), Some("nats://bus:4222"));

        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "eighty"));
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar("PORT", _))));

        let mut vars = REQUIRED.to_vec();
        vars.push(("PAYMENT_TIMEOUT_SECS", "0"));
        assert!(matches!(load(&vars), Err(ConfigError::InvalidEnvVar("PAYMENT_TIMEOUT_SECS", _))));
    }
}
