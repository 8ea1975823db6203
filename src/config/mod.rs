//! # Configuration Module
//!
//! This module handles application configuration loading and management.
//! Configuration can be loaded from:
//! - Environment variables (prefixed with APP__, plus DISCORD_TOKEN and REDIS_URL)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_relay::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Resolving gateway through {}", settings.gateway.api_base_url);
//! ```

mod settings;

pub use settings::*;
