//! Identity resolution against the external registry
//!
//! The registry is the external source of truth for who an identifier
//! belongs to and whether it is still current. Lookups are batched; a
//! lookaside cache bounds the query load and tolerates staleness within a
//! fixed expiry.

pub mod cache;
pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;

pub use cache::CachingResolver;
pub use registry::RegistryResolver;

use crate::domain::identity::VerifiedIdentity;
use crate::error::{Error, Result};

/// Resolves personal identifiers to verified identities.
///
/// Identifiers absent from the returned map did not resolve at all; whether
/// that is an error depends on the caller.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Batch lookup of identifiers
    async fn resolve(&self, identifiers: &[String]) -> Result<HashMap<String, VerifiedIdentity>>;

    /// Resolve a single identifier, requiring it to exist
    async fn resolve_required(&self, identifier: &str) -> Result<VerifiedIdentity> {
        let batch = [identifier.to_string()];
        self.resolve(&batch)
            .await?
            .remove(identifier)
            .ok_or_else(|| Error::UnknownIdentity(identifier.to_string()))
    }

    /// Resolve a single identifier, requiring it to exist and be active
    async fn resolve_active(&self, identifier: &str) -> Result<VerifiedIdentity> {
        let identity = self.resolve_required(identifier).await?;
        if !identity.active {
            return Err(Error::InactiveIdentity(identifier.to_string()));
        }
        Ok(identity)
    }
}
