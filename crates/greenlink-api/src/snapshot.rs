// Snapshot endpoint client
//
// Fetches the authoritative state of a single zone together with the
// server timestamp the backend assigned to it. The multiplexer uses the
// timestamp as a reconciliation baseline; the state itself is passed
// through untouched.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::http::HttpConfig;
use crate::model::{EntityId, EntitySnapshot};

/// Source of authoritative per-entity snapshots.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_entity_snapshot(&self, entity: EntityId) -> Result<EntitySnapshot, Error>;
}

/// Error body the backend returns on non-2xx responses.
#[derive(serde::Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Envelope some backend versions wrap the snapshot in.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum SnapshotBody {
    Wrapped { data: EntitySnapshot },
    Bare(EntitySnapshot),
}

/// HTTP client for `GET {base}/api/zones/{id}/snapshot`.
pub struct SnapshotClient {
    http: reqwest::Client,
    base_url: Url,
}

impl SnapshotClient {
    /// Build a client, injecting a bearer token if one is configured.
    pub fn new(
        base_url: Url,
        token: Option<&SecretString>,
        http: &HttpConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                    .map_err(|e| Error::InvalidHeader(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let http = http.build_client_with_headers(headers)?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn snapshot_url(&self, entity: EntityId) -> Result<Url, Error> {
        Ok(self
            .base_url
            .join(&format!("api/zones/{entity}/snapshot"))?)
    }
}

#[async_trait]
impl SnapshotFetcher for SnapshotClient {
    async fn fetch_entity_snapshot(&self, entity: EntityId) -> Result<EntitySnapshot, Error> {
        let url = self.snapshot_url(entity)?;
        debug!(%url, %entity, "fetching entity snapshot");

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        trace!(status = status.as_u16(), len = body.len(), "snapshot response");

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_owned());
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        match serde_json::from_str::<SnapshotBody>(&body) {
            Ok(SnapshotBody::Wrapped { data } | SnapshotBody::Bare(data)) => Ok(data),
            Err(e) => Err(Error::Deserialization {
                message: e.to_string(),
                body,
            }),
        }
    }
}
