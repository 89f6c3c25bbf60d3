//! HTTP client for the external identity registry

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::identity::VerifiedIdentity;
use crate::error::{Error, Result};
use crate::resolver::IdentityResolver;

/// Default upper bound on identifiers per lookup request
pub const DEFAULT_LOOKUP_BATCH_MAX: usize = 100;

/// Identity resolver backed by the external registry's batch lookup endpoint
pub struct RegistryResolver {
    client: reqwest::Client,
    base_url: String,
    batch_max: usize,
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    identifiers: &'a [String],
}

#[derive(Deserialize)]
struct LookupResponse {
    identities: HashMap<String, VerifiedIdentity>,
}

impl RegistryResolver {
    pub fn new(base_url: impl Into<String>, timeout: Duration, batch_max: usize) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch_max: batch_max.max(1),
        })
    }

    async fn lookup_chunk(&self, chunk: &[String]) -> Result<HashMap<String, VerifiedIdentity>> {
        let url = format!("{}/api/v1/identities/lookup", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&LookupRequest { identifiers: chunk })
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::RegistryUnavailable(format!(
                "registry returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(Error::Other(format!(
                "unexpected registry response: {}",
                status
            )));
        }

        let body: LookupResponse = response.json().await.map_err(classify_transport_error)?;

        debug!(
            requested = chunk.len(),
            resolved = body.identities.len(),
            "Registry lookup completed"
        );
        Ok(body.identities)
    }
}

/// Connectivity failures are transient registry outages; everything else
/// keeps its reqwest classification.
fn classify_transport_error(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::RegistryUnavailable(e.to_string())
    } else {
        Error::Network(e)
    }
}

#[async_trait]
impl IdentityResolver for RegistryResolver {
    async fn resolve(&self, identifiers: &[String]) -> Result<HashMap<String, VerifiedIdentity>> {
        let mut resolved = HashMap::with_capacity(identifiers.len());
        for chunk in identifiers.chunks(self.batch_max) {
            resolved.extend(self.lookup_chunk(chunk).await?);
        }
        Ok(resolved)
    }
}
