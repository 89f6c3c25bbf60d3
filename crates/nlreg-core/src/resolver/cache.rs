//! Lookaside cache for identity lookups
//!
//! The cache is stale-tolerant within a fixed TTL and only stores positive
//! results: an identifier that failed to resolve is asked for again on the
//! next lookup, because the registry is eventually consistent and the
//! identifier may appear later.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::identity::VerifiedIdentity;
use crate::error::Result;
use crate::resolver::IdentityResolver;

struct CacheEntry {
    identity: VerifiedIdentity,
    fetched_at: Instant,
}

/// Caching wrapper around any [`IdentityResolver`]
pub struct CachingResolver {
    inner: Arc<dyn IdentityResolver>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn IdentityResolver>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached identities (fresh or stale)
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for CachingResolver {
    async fn resolve(&self, identifiers: &[String]) -> Result<HashMap<String, VerifiedIdentity>> {
        let mut resolved = HashMap::with_capacity(identifiers.len());
        let mut misses = Vec::new();

        {
            let entries = self.entries.read().await;
            let now = Instant::now();
            for id in identifiers {
                match entries.get(id) {
                    Some(entry) if now.duration_since(entry.fetched_at) < self.ttl => {
                        resolved.insert(id.clone(), entry.identity.clone());
                    }
                    _ => misses.push(id.clone()),
                }
            }
        }

        if misses.is_empty() {
            return Ok(resolved);
        }

        debug!(hits = resolved.len(), misses = misses.len(), "Identity cache lookup");

        let fetched = self.inner.resolve(&misses).await?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        for (id, identity) in &fetched {
            entries.insert(
                id.clone(),
                CacheEntry {
                    identity: identity.clone(),
                    fetched_at: now,
                },
            );
        }
        drop(entries);

        resolved.extend(fetched);
        Ok(resolved)
    }
}
