//! Gateway Endpoint Resolver
//!
//! Asks the REST API for the gateway address (`GET /gateway/bot`).

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::config::GatewaySettings;
use crate::gateway::EndpointResolver;
use crate::shared::error::{GatewayError, Result};

/// Response body of `GET /gateway/bot`
#[derive(Debug, Deserialize)]
pub struct GatewayBotResponse {
    pub url: String,
}

/// Resolves the gateway endpoint over HTTP
#[derive(Debug, Clone)]
pub struct HttpEndpointResolver {
    client: reqwest::Client,
    api_base_url: String,
    token: String,
}

impl HttpEndpointResolver {
    pub fn new(api_base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base_url: api_base_url.into(),
            token: token.into(),
        }
    }

    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self::new(settings.api_base_url.clone(), settings.token.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/gateway/bot", self.api_base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EndpointResolver for HttpEndpointResolver {
    #[instrument(skip(self), fields(api = %self.api_base_url))]
    async fn resolve(&self) -> Result<Url> {
        debug!("Fetching gateway address");

        let response = self
            .client
            .get(self.endpoint())
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Resolve(format!(
                "gateway lookup returned {}",
                status
            )));
        }

        let body: GatewayBotResponse = response.json().await?;
        debug!(url = %body.url, "Got gateway address");
        Ok(Url::parse(&body.url)?)
    }
}
