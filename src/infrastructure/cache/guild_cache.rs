//! Guild Cache Writer
//!
//! Persists member and presence payloads from dispatch events into Redis
//! hashes keyed by guild id, one field per user id. Payloads are stored
//! exactly as received.
//!
//! Subscribers run on the gateway driver, so they only derive the writes
//! and queue them; a background task applies them to the store.

use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::keys;
use crate::gateway::GatewayClient;
use crate::shared::error::Result;

/// Dispatch events the writer subscribes to
pub const CACHED_EVENTS: [&str; 5] = [
    "GUILD_CREATE",
    "GUILD_MEMBER_ADD",
    "GUILD_MEMBER_UPDATE",
    "GUILD_MEMBER_REMOVE",
    "PRESENCE_UPDATE",
];

/// A single hash mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite {
    Upsert {
        key: String,
        fields: Vec<(String, String)>,
    },
    Remove {
        key: String,
        field: String,
    },
}

/// Backing store for guild records
#[async_trait]
pub trait GuildStore: Send + Sync {
    async fn apply(&self, write: &CacheWrite) -> Result<()>;
}

/// Redis-backed guild store
#[derive(Clone)]
pub struct RedisGuildStore {
    redis: ConnectionManager,
}

impl RedisGuildStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl GuildStore for RedisGuildStore {
    async fn apply(&self, write: &CacheWrite) -> Result<()> {
        let mut conn = self.redis.clone();
        match write {
            CacheWrite::Upsert { key, fields } => {
                conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
            }
            CacheWrite::Remove { key, field } => {
                conn.hdel::<_, _, ()>(key, field).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RedisGuildStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisGuildStore").finish_non_exhaustive()
    }
}

/// Derive the cache writes for a dispatch event.
pub fn writes_for(event_name: &str, payload: &Value) -> Vec<CacheWrite> {
    match event_name {
        "GUILD_CREATE" => {
            let Some(guild_id) = id_of(&payload["id"]) else {
                return Vec::new();
            };
            [
                (keys::members(&guild_id), &payload["members"]),
                (keys::presences(&guild_id), &payload["presences"]),
            ]
            .into_iter()
            .filter_map(|(key, records)| {
                let fields = records_by_user(records);
                (!fields.is_empty()).then_some(CacheWrite::Upsert { key, fields })
            })
            .collect()
        }
        "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
            upsert_one(payload, keys::members).into_iter().collect()
        }
        "PRESENCE_UPDATE" => upsert_one(payload, keys::presences).into_iter().collect(),
        "GUILD_MEMBER_REMOVE" => match (id_of(&payload["guild_id"]), user_id(payload)) {
            (Some(guild_id), Some(user_id)) => vec![CacheWrite::Remove {
                key: keys::members(&guild_id),
                field: user_id,
            }],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn upsert_one(payload: &Value, key: fn(&str) -> String) -> Option<CacheWrite> {
    let guild_id = id_of(&payload["guild_id"])?;
    let user_id = user_id(payload)?;
    Some(CacheWrite::Upsert {
        key: key(&guild_id),
        fields: vec![(user_id, payload.to_string())],
    })
}

fn records_by_user(records: &Value) -> Vec<(String, String)> {
    records
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|record| Some((user_id(record)?, record.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn user_id(record: &Value) -> Option<String> {
    id_of(&record["user"]["id"])
}

/// Snowflakes arrive as strings, but accept numbers too.
fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Queues cache writes from dispatch subscribers
#[derive(Debug, Clone)]
pub struct GuildCacheWriter {
    tx: mpsc::UnboundedSender<CacheWrite>,
}

impl GuildCacheWriter {
    /// Start the background task applying writes to `store`.
    pub fn spawn(store: Arc<dyn GuildStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<CacheWrite>();

        let task = tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                if let Err(e) = store.apply(&write).await {
                    tracing::error!(error = %e, write = ?write, "Failed to persist guild record");
                }
            }
            tracing::debug!("Guild cache writer stopped");
        });

        (Self { tx }, task)
    }

    /// Queue the writes for one dispatch event. Returns how many were queued.
    pub fn enqueue(&self, event_name: &str, payload: &Value) -> anyhow::Result<usize> {
        let writes = writes_for(event_name, payload);
        let count = writes.len();
        for write in writes {
            self.tx
                .send(write)
                .map_err(|_| anyhow::anyhow!("guild cache writer is not running"))?;
        }
        Ok(count)
    }

    /// Subscribe to the member and presence events of `client`.
    pub fn register(&self, client: &GatewayClient) {
        for event in CACHED_EVENTS {
            let writer = self.clone();
            client.on_dispatch(event, move |name, payload| {
                let queued = writer.enqueue(name, payload)?;
                tracing::trace!(event = name, writes = queued, "Queued guild cache writes");
                Ok(())
            });
        }
    }
}
