//! Shared test fixtures

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::domain::identity::VerifiedIdentity;
use crate::error::Result;
use crate::events::InMemoryPublisher;
use crate::metrics::CountingMetrics;
use crate::reconcile::ReconcileEngine;
use crate::resolver::IdentityResolver;
use crate::storage::RelationshipStore;
use crate::storage::migrations::run_migrations;

pub(crate) async fn setup_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool).await.expect("Failed to run migrations");
    pool
}

/// Resolver backed by a fixed map; identifiers not in the map are unknown.
pub(crate) struct FakeResolver {
    identities: HashMap<String, VerifiedIdentity>,
}

impl FakeResolver {
    pub(crate) fn new() -> Self {
        Self {
            identities: HashMap::new(),
        }
    }

    pub(crate) fn with_active(mut self, identifier: &str, display_name: &str) -> Self {
        self.identities.insert(
            identifier.to_string(),
            VerifiedIdentity {
                identity_id: format!("aktor-{}", identifier),
                display_name: display_name.to_string(),
                active: true,
            },
        );
        self
    }

    pub(crate) fn with_inactive(mut self, identifier: &str) -> Self {
        self.identities.insert(
            identifier.to_string(),
            VerifiedIdentity {
                identity_id: format!("aktor-{}", identifier),
                display_name: String::new(),
                active: false,
            },
        );
        self
    }
}

#[async_trait]
impl IdentityResolver for FakeResolver {
    async fn resolve(&self, identifiers: &[String]) -> Result<HashMap<String, VerifiedIdentity>> {
        Ok(identifiers
            .iter()
            .filter_map(|id| self.identities.get(id).map(|v| (id.clone(), v.clone())))
            .collect())
    }
}

pub(crate) struct TestHarness {
    pub(crate) engine: Arc<ReconcileEngine>,
    pub(crate) publisher: Arc<InMemoryPublisher>,
    pub(crate) metrics: Arc<CountingMetrics>,
    pub(crate) pool: SqlitePool,
}

pub(crate) async fn setup_engine(resolver: FakeResolver) -> TestHarness {
    let pool = setup_test_pool().await;
    let publisher = Arc::new(InMemoryPublisher::new());
    let metrics = Arc::new(CountingMetrics::new());
    let engine = Arc::new(ReconcileEngine::new(
        RelationshipStore::new(pool.clone()),
        Arc::new(resolver),
        publisher.clone(),
        metrics.clone(),
    ));

    TestHarness {
        engine,
        publisher,
        metrics,
        pool,
    }
}
