//! Adapter for platforms that expose canonical records over REST
//!
//! Routes, relative to `base_url`:
//!
//! | Operation | Request |
//! |---|---|
//! | authenticate | `GET auth` |
//! | check_connection | `GET health` |
//! | get_entities | `GET {entity}?updated_since=..&limit=..&page_size=..` |
//! | get_entity | `GET {entity}/{id}` |
//! | create_entity | `POST {entity}` |
//! | update_entity | `PUT {entity}/{id}` |
//! | update_inventory | `PUT inventory/{sku}/level` with `{"quantity", "location_id"}` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value;

use super::http::RateLimitedHttpClient;
use super::traits::PlatformClient;
use crate::error::PlatformError;
use crate::models::{Capabilities, CanonicalRecord, EntityFilter, EntityType, PlatformIdentity, RateLimitState};
use crate::ratelimit::RateLimiter;

#[derive(Serialize)]
struct InventoryLevel<'a> {
    quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location_id: Option<&'a str>,
}

/// REST adapter speaking canonical JSON
#[derive(Debug)]
pub struct RestPlatform {
    tag: String,
    http: RateLimitedHttpClient,
    limiter: Arc<RateLimiter>,
    capabilities: Capabilities,
}

impl RestPlatform {
    /// Create an adapter over an HTTP client
    pub fn new(
        tag: impl Into<String>,
        http: RateLimitedHttpClient,
        limiter: Arc<RateLimiter>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            tag: tag.into(),
            http,
            limiter,
            capabilities,
        }
    }

    /// Build from platform options
    ///
    /// Requires `base_url`. `capabilities` is an optional comma-separated list
    /// of supported features; all entity types are supported when absent. A
    /// `token` credential is sent as a bearer token.
    pub fn from_options(
        identity: &PlatformIdentity,
        options: &HashMap<String, String>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, PlatformError> {
        let base_url = options.get("base_url").ok_or_else(|| {
            PlatformError::Validation(format!("platform '{}' has no base_url option", identity.tag))
        })?;

        let mut http = RateLimitedHttpClient::new(base_url.as_str(), limiter.clone())?;
        if let Some(token) = identity.credentials.get("token") {
            http = http.with_bearer_token(token)?;
        }

        let capabilities = match options.get("capabilities") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .fold(Capabilities::new(), |caps, feature| caps.with(feature, true)),
            None => Capabilities::all_entities(),
        };

        Ok(Self::new(identity.tag.clone(), http, limiter, capabilities))
    }
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

fn list_path(entity: EntityType, filter: &EntityFilter) -> String {
    let mut params = Vec::new();
    if let Some(since) = filter.updated_since {
        params.push(("updated_since", since.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }
    if let Some(limit) = filter.limit {
        params.push(("limit", limit.to_string()));
    }
    if let Some(page_size) = filter.page_size {
        params.push(("page_size", page_size.to_string()));
    }

    if params.is_empty() {
        return entity.as_str().to_string();
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", entity, query)
}

#[async_trait]
impl PlatformClient for RestPlatform {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn authenticate(&self) -> Result<(), PlatformError> {
        self.http.get_json::<Value>("auth").await.map(|_| ())
    }

    async fn check_connection(&self) -> bool {
        self.http.probe("health").await
    }

    async fn get_entities(
        &self,
        entity: EntityType,
        filter: &EntityFilter,
    ) -> Result<Vec<CanonicalRecord>, PlatformError> {
        self.http.get_json(&list_path(entity, filter)).await
    }

    async fn get_entity(
        &self,
        entity: EntityType,
        id: &str,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.http
            .get_json(&format!("{}/{}", entity, segment(id)))
            .await
    }

    async fn create_entity(
        &self,
        entity: EntityType,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.http.post_json(entity.as_str(), record).await
    }

    async fn update_entity(
        &self,
        entity: EntityType,
        id: &str,
        record: &CanonicalRecord,
    ) -> Result<CanonicalRecord, PlatformError> {
        self.http
            .put_json(&format!("{}/{}", entity, segment(id)), record)
            .await
    }

    async fn update_inventory(
        &self,
        sku: &str,
        quantity: i64,
        location_id: Option<String>,
    ) -> Result<bool, PlatformError> {
        let body = InventoryLevel {
            quantity,
            location_id: location_id.as_deref(),
        };
        self.http
            .put_json(&format!("inventory/{}/level", segment(sku)), &body)
            .await
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn rate_limit_info(&self) -> RateLimitState {
        self.limiter.state()
    }
}
