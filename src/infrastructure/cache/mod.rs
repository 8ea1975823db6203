//! Cache Module
//!
//! Redis connection management and the guild cache writer.
//!
//! ```text
//! +-------------------+
//! | Dispatch registry |
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! | GuildCacheWriter  |  <-- derives writes, queues them
//! +-------------------+
//!          |
//!          v
//! +-------------------+
//! |   GuildStore      |  <-- RedisGuildStore in production
//! +-------------------+
//! ```

mod guild_cache;

pub use guild_cache::{
    writes_for, CacheWrite, GuildCacheWriter, GuildStore, RedisGuildStore, CACHED_EVENTS,
};

use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{info, instrument};

use crate::config::RedisSettings;

/// Creates a Redis connection manager with automatic reconnection.
#[instrument(skip(settings), fields(url = %settings.url))]
pub async fn create_redis_client(
    settings: &RedisSettings,
) -> Result<ConnectionManager, redis::RedisError> {
    info!("Connecting to Redis...");
    let client = Client::open(settings.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("Redis connection established");
    Ok(manager)
}

/// Cache key prefixes for guild records.
pub mod keys {
    /// Prefix for guild member hashes (e.g., "members:guild_id")
    pub const GUILD_MEMBERS: &str = "members:";

    /// Prefix for guild presence hashes (e.g., "presences:guild_id")
    pub const GUILD_PRESENCES: &str = "presences:";

    /// Generates a guild members key
    #[inline]
    pub fn members(guild_id: &str) -> String {
        format!("{}{}", GUILD_MEMBERS, guild_id)
    }

    /// Generates a guild presences key
    #[inline]
    pub fn presences(guild_id: &str) -> String {
        format!("{}{}", GUILD_PRESENCES, guild_id)
    }
}
