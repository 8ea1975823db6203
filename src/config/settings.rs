//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Gateway connection settings
    pub gateway: GatewaySettings,

    /// Connection properties reported in Identify
    pub identify: IdentifySettings,

    /// Redis configuration
    pub redis: RedisSettings,

    /// Guild cache writer configuration
    pub cache: CacheSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Gateway connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    /// Bot token used for endpoint resolution, Identify and Resume
    pub token: String,

    /// REST API base URL used to resolve the gateway endpoint
    pub api_base_url: String,

    /// Gateway protocol version appended to the endpoint
    pub version: u8,

    /// Payload encoding appended to the endpoint
    pub encoding: String,

    /// Delay before retrying a failed reconnect attempt, in milliseconds
    pub reconnect_delay_ms: u64,
}

/// Identify connection properties.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifySettings {
    pub os: String,
    pub browser: String,
    pub device: String,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,
}

/// Guild cache writer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Persist member and presence payloads to Redis
    pub enabled: bool,
}

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if no gateway token is configured.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Self::builder(&environment)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__GATEWAY__VERSION=6 -> gateway.version = 6
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("gateway.token", std::env::var("DISCORD_TOKEN").ok())?
            .set_override_option(
                "gateway.api_base_url",
                std::env::var("GATEWAY_API_BASE_URL").ok(),
            )?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .build()?
            .try_deserialize()
            .and_then(Self::validate)
    }

    /// Default values shared by `load` and tests.
    fn builder(
        environment: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("environment", environment)?
            .set_default("gateway.token", "")?
            .set_default("gateway.api_base_url", "https://discord.com/api/v6")?
            .set_default("gateway.version", 6)?
            .set_default("gateway.encoding", "json")?
            .set_default("gateway.reconnect_delay_ms", 5000_i64)?
            .set_default("identify.os", std::env::consts::OS)?
            .set_default("identify.browser", "gateway-relay")?
            .set_default("identify.device", "gateway-relay")?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("cache.enabled", true)
    }

    fn validate(settings: Self) -> Result<Self, ConfigError> {
        if settings.gateway.token.trim().is_empty() {
            return Err(ConfigError::Message(
                "Missing gateway token: set DISCORD_TOKEN or gateway.token".into(),
            ));
        }
        Ok(settings)
    }
}

impl GatewaySettings {
    /// Reconnect retry delay as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
