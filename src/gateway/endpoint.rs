//! Gateway Endpoint Resolution
//!
//! The controller asks a resolver for the base gateway URL before every
//! connection attempt, then pins the protocol version and encoding on it.

use async_trait::async_trait;
use url::Url;

use crate::shared::error::Result;

/// Looks up the base URL of the gateway
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self) -> Result<Url>;
}

/// Resolver that always returns the same endpoint
#[derive(Debug, Clone)]
pub struct StaticEndpoint(pub Url);

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn resolve(&self) -> Result<Url> {
        Ok(self.0.clone())
    }
}

/// Append `v` and `encoding` query parameters to a base gateway URL,
/// replacing any existing values for them.
pub fn gateway_url(base: &Url, version: u8, encoding: &str) -> Url {
    let mut url = base.clone();
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "v" && k != "encoding")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("v", &version.to_string())
        .append_pair("encoding", encoding);
    url
}
