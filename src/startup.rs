//! Application Startup
//!
//! Builds the gateway client and its collaborators from settings and runs
//! the session until it ends.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::gateway::{ClientConfig, ConnectionStage, GatewayClient, WebSocketConnector};
use crate::infrastructure::cache::{self, GuildCacheWriter, RedisGuildStore};
use crate::infrastructure::http::HttpEndpointResolver;
use crate::infrastructure::metrics;

/// Application instance
pub struct Application {
    client: GatewayClient,
    cache_task: Option<JoinHandle<()>>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        let resolver = Arc::new(HttpEndpointResolver::from_settings(&settings.gateway));
        let client = GatewayClient::new(
            ClientConfig::from_settings(&settings),
            resolver,
            Arc::new(WebSocketConnector),
        );

        client.on_dispatch("GUILD_CREATE", |_, guild| {
            tracing::info!(guild_id = %guild["id"], "Guild available");
            Ok(())
        });

        let cache_task = if settings.cache.enabled {
            let redis = cache::create_redis_client(&settings.redis).await?;
            let (writer, task) = GuildCacheWriter::spawn(Arc::new(RedisGuildStore::new(redis)));
            writer.register(&client);
            tracing::info!("Guild cache writer registered");
            Some(task)
        } else {
            tracing::info!("Guild cache disabled");
            None
        };

        Ok(Self { client, cache_task })
    }

    /// Run the gateway session until it terminates or Ctrl-C is received
    pub async fn run_until_stopped(self) -> Result<()> {
        let mut handle = self.client.connect().await?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                handle.shutdown();
            }
            _ = handle.wait_for_stage(ConnectionStage::Terminated) => {}
        }

        let outcome = handle.join().await;

        // Dropping the client releases the writer's subscribers so it can drain
        drop(self.client);
        if let Some(task) = self.cache_task {
            let _ = task.await;
        }

        tracing::debug!(metrics = %metrics::gather_metrics(), "Final gateway metrics");
        outcome.map_err(Into::into)
    }
}
