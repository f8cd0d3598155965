//! # Timeline Client
//!
//! The outbound capability set the worker posts through: `putDomain`,
//! `putEntities` (single-argument and `(attemptId, groupId, entity)`
//! variants), optional `flush`, and `stop`. `HttpTimelineClient` is the real
//! `reqwest`-backed implementation; tests substitute a mock through the
//! `TimelineClient` trait object.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::entity::{TimelineDomain, TimelineEntity};
use crate::error::{Result, TimelineError};

/// Response to a `putEntities` call. A 2xx HTTP status with a non-empty
/// `errors` list is a permanent rejection, never retried.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutResponse {
    #[serde(default)]
    pub errors: Vec<PutError>,
}

impl PutResponse {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutError {
    pub entity_id: String,
    pub entity_type: String,
    pub error_code: String,
}

/// The capability set described in §6: `putDomain`, two `putEntities`
/// variants, optional `flush`, and `stop`.
#[async_trait]
pub trait TimelineClient: Send + Sync {
    async fn put_domain(&self, domain: &TimelineDomain) -> Result<()>;

    async fn put_entities(&self, entity: &TimelineEntity) -> Result<PutResponse>;

    async fn put_entities_for_attempt(
        &self,
        attempt_id: Option<&str>,
        group_id: &str,
        entity: &TimelineEntity,
    ) -> Result<PutResponse>;

    /// Whether this client implementation supports `flush`.
    fn is_flushable(&self) -> bool {
        false
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()>;
}

/// `reqwest`-backed client posting JSON to the Timeline Server's REST API.
pub struct HttpTimelineClient {
    http: Client,
    endpoint: String,
}

impl HttpTimelineClient {
    pub fn new(endpoint: String, timeout: std::time::Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TimelineError::Network {
                message: e.to_string(),
                endpoint: Some(endpoint.clone()),
                status_code: None,
            })?;
        Ok(Self { http, endpoint })
    }

    fn entities_url(&self) -> String {
        format!("{}/ws/v1/timeline", self.endpoint.trim_end_matches('/'))
    }

    fn domain_url(&self) -> String {
        format!("{}/ws/v1/timeline/domain", self.endpoint.trim_end_matches('/'))
    }

    async fn post_entity(&self, entity: &TimelineEntity) -> Result<PutResponse> {
        let response = self
            .http
            .post(self.entities_url())
            .json(&serde_json::json!({ "entities": [entity] }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(TimelineError::Network {
                message: format!("timeline server returned status {status}"),
                endpoint: Some(self.entities_url()),
                status_code: Some(status),
            });
        }

        let body: PutResponse = response.json().await.unwrap_or_default();
        Ok(body)
    }
}

#[async_trait]
impl TimelineClient for HttpTimelineClient {
    async fn put_domain(&self, domain: &TimelineDomain) -> Result<()> {
        let response = self.http.put(self.domain_url()).json(domain).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(TimelineError::Domain {
                message: format!("domain put failed with status {status}"),
            });
        }
        Ok(())
    }

    async fn put_entities(&self, entity: &TimelineEntity) -> Result<PutResponse> {
        self.post_entity(entity).await
    }

    async fn put_entities_for_attempt(
        &self,
        _attempt_id: Option<&str>,
        _group_id: &str,
        entity: &TimelineEntity,
    ) -> Result<PutResponse> {
        // The v1.5 grouped endpoint shares the same entity payload shape;
        // attempt/group routing happens via the entity's own otherInfo.
        self.post_entity(entity).await
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}
