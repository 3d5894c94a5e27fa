// src/config.rs
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub enum JwtKey {
    Secret(String),
    RsaPublicPem(String),
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub key: JwtKey,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub key_id: String,
    pub key_secret: String,
    pub base_url: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub auth: AuthConfig,
    pub payments: PaymentConfig,
    /// `None` disables room provisioning.
    pub rooms: Option<RoomConfig>,
    pub external_timeout: Duration,
    /// `None` disables the background settlement sweep.
    pub settlement_sweep: Option<Duration>,
}

impl AppConfig {
    /// Reads configuration from the process environment. Call `dotenvy::dotenv()` first
    /// to pick up a local `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let key = match (optional("AUTH_JWT_PUBLIC_KEY_PEM"), optional("AUTH_JWT_SECRET")) {
            (Some(pem), _) => JwtKey::RsaPublicPem(pem.replace("\\n", "\n")),
            (None, Some(secret)) => JwtKey::Secret(secret),
            (None, None) => return Err(ConfigError::Missing("AUTH_JWT_SECRET or AUTH_JWT_PUBLIC_KEY_PEM")),
        };

        let rooms = optional("DAILY_API_KEY").map(|api_key| RoomConfig {
            api_key,
            base_url: optional("DAILY_BASE_URL").unwrap_or_else(|| "https://api.daily.co/v1".to_string()),
        });

        let sweep_secs: u64 = parse_or("SETTLEMENT_SWEEP_SECS", 0)?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5)?,
            bind_addr: parse_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 4000)))?,
            auth: AuthConfig {
                key,
                issuer: optional("AUTH_JWT_ISSUER"),
                audience: optional("AUTH_JWT_AUDIENCE"),
            },
            payments: PaymentConfig {
                key_id: required("RAZORPAY_KEY_ID")?,
                key_secret: required("RAZORPAY_KEY_SECRET")?,
                base_url: optional("RAZORPAY_BASE_URL").unwrap_or_else(|| "https://api.razorpay.com/v1".to_string()),
                currency: optional("PAYMENT_CURRENCY").unwrap_or_else(|| "INR".to_string()),
            },
            rooms,
            external_timeout: Duration::from_secs(parse_or("EXTERNAL_TIMEOUT_SECS", 10)?),
            settlement_sweep: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        })
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parse_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
