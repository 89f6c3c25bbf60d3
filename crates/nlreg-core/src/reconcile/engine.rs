//! Reconciliation engine
//!
//! Applies one inbound claim to stored state, enforcing the
//! at-most-one-active-relationship-per-scope invariant, and produces the
//! derived events for the mutation. Re-application of the same claim is
//! idempotent: a repeated update for the incumbent manager is an in-place
//! refresh, and a termination with nothing active is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::claim::{Claim, ClaimSource, TerminationClaim, UpdateClaim};
use crate::domain::event::{DerivedEvent, EventStatus};
use crate::domain::identity::VerifiedIdentity;
use crate::domain::relationship::{NlRelationship, Scope};
use crate::error::{Error, Result};
use crate::events::EventPublisher;
use crate::metrics::{Counter, MetricsSink};
use crate::resolver::IdentityResolver;
use crate::storage::RelationshipStore;

/// Applies claims to the relationship store and emits derived events
pub struct ReconcileEngine {
    store: RelationshipStore,
    resolver: Arc<dyn IdentityResolver>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<dyn MetricsSink>,
}

impl ReconcileEngine {
    pub fn new(
        store: RelationshipStore,
        resolver: Arc<dyn IdentityResolver>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            store,
            resolver,
            publisher,
            metrics,
        }
    }

    pub fn store(&self) -> &RelationshipStore {
        &self.store
    }

    pub(crate) fn resolver(&self) -> &dyn IdentityResolver {
        self.resolver.as_ref()
    }

    pub(crate) fn metrics(&self) -> &dyn MetricsSink {
        self.metrics.as_ref()
    }

    /// Apply one inbound claim and publish the resulting events.
    ///
    /// The store mutation commits before publication starts; a publish
    /// failure surfaces as an error and the redelivered claim re-applies
    /// idempotently.
    pub async fn apply_claim(&self, claim: &Claim) -> Result<Vec<DerivedEvent>> {
        claim.validate()?;

        let result = match claim {
            Claim::Update(update) => self.apply_update(update).await,
            Claim::Terminate(termination) => self.apply_termination(termination).await,
        };

        match result {
            Ok(events) => {
                self.metrics.incr(Counter::ClaimsApplied);
                for event in &events {
                    self.publisher.publish(event.partition_key(), event).await?;
                }
                Ok(events)
            }
            Err(e) => {
                self.metrics.incr(Counter::ClaimsFailed);
                Err(e)
            }
        }
    }

    /// Case (a): a proposed active relationship
    async fn apply_update(&self, claim: &UpdateClaim) -> Result<Vec<DerivedEvent>> {
        let manager = self.resolve_participants(claim).await?;

        let scope = Scope::new(claim.employee_id.clone(), claim.employer_org_id.clone());
        let now = Utc::now();
        let mut events = Vec::new();

        let mut tx = self.store.pool().begin().await?;
        let existing = RelationshipStore::find_all_for_scope(&mut tx, &scope).await?;

        // Incumbent: the active relationship with the latest activation.
        // More than one active row is a pre-existing invariant violation;
        // the non-incumbents get closed unconditionally below.
        let incumbent = existing
            .iter()
            .filter(|r| r.is_active())
            .max_by_key(|r| r.active_from);

        match incumbent {
            Some(current) if current.manager_id == claim.manager.id => {
                for rel in existing.iter().filter(|r| r.is_active() && r.id != current.id) {
                    events.push(
                        self.close_in_tx(
                            &mut tx,
                            rel,
                            now,
                            now,
                            EventStatus::DeactivatedNewManager,
                            claim.source,
                        )
                        .await?,
                    );
                }

                // Idempotent refresh: contact fields and compensation only
                RelationshipStore::update_contact(
                    &mut tx,
                    &current.id,
                    &claim.manager.phone,
                    &claim.manager.email,
                    claim.compensation,
                    Some(&manager.display_name),
                    now,
                )
                .await?;

                let mut refreshed = current.clone();
                refreshed.manager_phone = claim.manager.phone.clone();
                refreshed.manager_email = claim.manager.email.clone();
                refreshed.compensation = claim.compensation;
                refreshed.manager_display_name = Some(manager.display_name.clone());
                refreshed.last_modified = now;

                events.push(DerivedEvent::from_relationship(
                    &refreshed,
                    new_manager_status(claim.source),
                    claim.source,
                    now,
                ));
                self.metrics.incr(Counter::RefreshesInPlace);
                debug!(
                    relationship_id = %current.id,
                    employer = %claim.employer_org_id,
                    "Incumbent manager refreshed in place"
                );
            }
            _ => {
                let close_at = claim.active_to.unwrap_or(now);
                for rel in existing.iter().filter(|r| r.is_active()) {
                    events.push(
                        self.close_in_tx(
                            &mut tx,
                            rel,
                            close_at,
                            now,
                            EventStatus::DeactivatedNewManager,
                            claim.source,
                        )
                        .await?,
                    );
                }

                let mut rel = NlRelationship::new(
                    claim.employee_id.clone(),
                    claim.employer_org_id.clone(),
                    claim.manager.id.clone(),
                    claim.manager.phone.clone(),
                    claim.manager.email.clone(),
                    claim.compensation,
                    claim.active_from.unwrap_or(now),
                );
                rel.manager_display_name = Some(manager.display_name.clone());
                rel.last_modified = now;

                RelationshipStore::insert(&mut tx, &rel).await?;
                events.push(DerivedEvent::from_relationship(
                    &rel,
                    new_manager_status(claim.source),
                    claim.source,
                    now,
                ));
                self.metrics.incr(Counter::RelationshipsCreated);
                info!(
                    relationship_id = %rel.id,
                    employer = %claim.employer_org_id,
                    source = %claim.source,
                    "New active relationship created"
                );
            }
        }

        tx.commit().await?;
        Ok(events)
    }

    /// Case (b): an explicit termination of whatever is active in the scope
    async fn apply_termination(&self, claim: &TerminationClaim) -> Result<Vec<DerivedEvent>> {
        let scope = Scope::new(claim.employee_id.clone(), claim.employer_org_id.clone());
        let now = Utc::now();
        let status = EventStatus::for_termination(claim.source);
        let mut events = Vec::new();

        let mut tx = self.store.pool().begin().await?;
        let active = RelationshipStore::find_active_for_scope(&mut tx, &scope).await?;

        if active.is_empty() {
            // Nothing active is not an error: redelivery and cross-stream
            // races land here routinely.
            self.metrics.incr(Counter::TerminationsNoop);
            debug!(employer = %claim.employer_org_id, "Termination with no active relationship");
            return Ok(events);
        }

        for rel in &active {
            events.push(
                self.close_in_tx(&mut tx, rel, claim.terminated_at, now, status, claim.source)
                    .await?,
            );
        }

        tx.commit().await?;
        Ok(events)
    }

    async fn close_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        rel: &NlRelationship,
        close_at: DateTime<Utc>,
        now: DateTime<Utc>,
        status: EventStatus,
        source: ClaimSource,
    ) -> Result<DerivedEvent> {
        // A close time before activation would break active_from <= active_to
        let close_at = close_at.max(rel.active_from);

        RelationshipStore::close(&mut *tx, &rel.id, close_at, now).await?;
        self.metrics.incr(Counter::RelationshipsClosed);

        let mut closed = rel.clone();
        closed.active_to = Some(close_at);
        closed.last_modified = now;

        Ok(DerivedEvent::from_relationship(&closed, status, source, now))
    }

    /// Both participants of an update claim must resolve to currently-valid
    /// identities. Returns the manager's identity for display-name
    /// enrichment.
    async fn resolve_participants(&self, claim: &UpdateClaim) -> Result<VerifiedIdentity> {
        let identifiers = vec![claim.employee_id.clone(), claim.manager.id.clone()];
        let mut resolved = self.resolver.resolve(&identifiers).await?;

        let employee = resolved
            .remove(&claim.employee_id)
            .ok_or_else(|| Error::UnknownIdentity(claim.employee_id.clone()))?;
        if !employee.active {
            return Err(Error::InactiveIdentity(claim.employee_id.clone()));
        }

        let manager = resolved
            .remove(&claim.manager.id)
            .ok_or_else(|| Error::UnknownIdentity(claim.manager.id.clone()))?;
        if !manager.active {
            return Err(Error::InactiveIdentity(claim.manager.id.clone()));
        }

        Ok(manager)
    }
}

/// Status of the event announcing the (new or refreshed) active relationship
fn new_manager_status(source: ClaimSource) -> EventStatus {
    match source {
        ClaimSource::IdentitySystem => EventStatus::IdentityChanged,
        _ => EventStatus::NewManager,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::claim::ManagerContact;
    use crate::domain::relationship::Compensation;
    use crate::testutil::{FakeResolver, TestHarness, setup_engine};

    const EMPLOYEE: &str = "01010112345";
    const EMPLOYER: &str = "972674818";
    const MANAGER_1: &str = "02020254321";
    const MANAGER_2: &str = "03030367890";

    fn default_resolver() -> FakeResolver {
        FakeResolver::new()
            .with_active(EMPLOYEE, "Ola Nordmann")
            .with_active(MANAGER_1, "Kari Leder")
            .with_active(MANAGER_2, "Per Sjef")
    }

    fn update_claim(manager_id: &str, phone: &str, source: ClaimSource) -> Claim {
        Claim::Update(UpdateClaim {
            employer_org_id: EMPLOYER.into(),
            employee_id: EMPLOYEE.into(),
            manager: ManagerContact {
                id: manager_id.into(),
                phone: phone.into(),
                email: format!("{}@acme.example", manager_id),
            },
            compensation: Compensation::Unknown,
            active_from: None,
            active_to: None,
            source,
        })
    }

    fn termination_claim(source: ClaimSource) -> Claim {
        Claim::Terminate(TerminationClaim {
            employer_org_id: EMPLOYER.into(),
            employee_id: EMPLOYEE.into(),
            terminated_at: Utc::now(),
            source,
        })
    }

    async fn active_for_scope(harness: &TestHarness) -> Vec<NlRelationship> {
        let mut conn = harness.pool.acquire().await.unwrap();
        RelationshipStore::find_active_for_scope(&mut conn, &Scope::new(EMPLOYEE, EMPLOYER))
            .await
            .unwrap()
    }

    async fn all_for_scope(harness: &TestHarness) -> Vec<NlRelationship> {
        let mut conn = harness.pool.acquire().await.unwrap();
        RelationshipStore::find_all_for_scope(&mut conn, &Scope::new(EMPLOYEE, EMPLOYER))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_new_relationship_created() {
        let harness = setup_engine(default_resolver()).await;

        let events = harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "99887766", ClaimSource::Manager))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::NewManager);
        assert_eq!(events[0].manager_id, MANAGER_1);

        let active = active_for_scope(&harness).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].manager_display_name.as_deref(), Some("Kari Leder"));

        // Event was published after commit
        assert_eq!(harness.publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_refresh_same_manager() {
        let harness = setup_engine(default_resolver()).await;

        harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "11111111", ClaimSource::Manager))
            .await
            .unwrap();
        let first = active_for_scope(&harness).await;

        let events = harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "22222222", ClaimSource::Manager))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::NewManager);

        let rows = all_for_scope(&harness).await;
        assert_eq!(rows.len(), 1, "refresh must not create a second row");
        assert_eq!(rows[0].id, first[0].id, "id is immutable across refreshes");
        assert_eq!(
            rows[0].active_from.timestamp(),
            first[0].active_from.timestamp(),
            "refresh must not move active_from"
        );
        assert_eq!(rows[0].manager_phone, "22222222");
    }

    #[tokio::test]
    async fn test_refresh_closes_surplus_active_rows() {
        let harness = setup_engine(default_resolver()).await;

        // Simulate a store predating the uniqueness guard, holding two
        // active rows in one scope
        sqlx::query("DROP INDEX idx_nl_relationships_one_active")
            .execute(&harness.pool)
            .await
            .unwrap();

        let older = NlRelationship::new(
            EMPLOYEE,
            EMPLOYER,
            MANAGER_2,
            "1",
            "old@acme.example",
            Compensation::Unknown,
            "2025-01-01T00:00:00Z".parse().unwrap(),
        );
        let newer = NlRelationship::new(
            EMPLOYEE,
            EMPLOYER,
            MANAGER_1,
            "2",
            "new@acme.example",
            Compensation::Unknown,
            "2025-06-01T00:00:00Z".parse().unwrap(),
        );
        let mut conn = harness.pool.acquire().await.unwrap();
        RelationshipStore::insert(&mut conn, &older).await.unwrap();
        RelationshipStore::insert(&mut conn, &newer).await.unwrap();
        drop(conn);

        // Refreshing the incumbent (latest activation) must also close the
        // surplus row
        let events = harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "3", ClaimSource::Manager))
            .await
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, EventStatus::DeactivatedNewManager);
        assert_eq!(events[0].manager_id, MANAGER_2);
        assert_eq!(events[1].status, EventStatus::NewManager);
        assert_eq!(events[1].manager_id, MANAGER_1);

        let active = active_for_scope(&harness).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, newer.id, "incumbent row survives the refresh");
        assert_eq!(active[0].manager_phone, "3");
    }

    #[tokio::test]
    async fn test_manager_switch_closes_incumbent() {
        let harness = setup_engine(default_resolver()).await;

        harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "11111111", ClaimSource::Manager))
            .await
            .unwrap();

        let events = harness
            .engine
            .apply_claim(&update_claim(MANAGER_2, "22222222", ClaimSource::Employee))
            .await
            .unwrap();

        // Exactly two events: one deactivation tagged with the claim's
        // source, one new-manager
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, EventStatus::DeactivatedNewManager);
        assert_eq!(events[0].source, ClaimSource::Employee);
        assert_eq!(events[0].manager_id, MANAGER_1);
        assert!(events[0].active_to.is_some());
        assert_eq!(events[1].status, EventStatus::NewManager);
        assert_eq!(events[1].manager_id, MANAGER_2);

        let rows = all_for_scope(&harness).await;
        assert_eq!(rows.len(), 2);
        let active = active_for_scope(&harness).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].manager_id, MANAGER_2);
    }

    #[tokio::test]
    async fn test_at_most_one_active_across_sequence() {
        let harness = setup_engine(default_resolver()).await;

        let claims = vec![
            update_claim(MANAGER_1, "1", ClaimSource::Manager),
            update_claim(MANAGER_2, "2", ClaimSource::Manager),
            update_claim(MANAGER_1, "3", ClaimSource::Employee),
            termination_claim(ClaimSource::Employee),
            update_claim(MANAGER_2, "4", ClaimSource::Manager),
            update_claim(MANAGER_2, "5", ClaimSource::Manager),
        ];

        for claim in &claims {
            harness.engine.apply_claim(claim).await.unwrap();
            let active = active_for_scope(&harness).await;
            assert!(active.len() <= 1, "invariant violated after {:?}", claim);
        }
    }

    #[tokio::test]
    async fn test_termination_with_none_active_is_noop() {
        let harness = setup_engine(default_resolver()).await;

        let events = harness
            .engine
            .apply_claim(&termination_claim(ClaimSource::Employee))
            .await
            .unwrap();

        assert!(events.is_empty());
        assert!(harness.publisher.published().is_empty());
        assert_eq!(harness.metrics.get(Counter::TerminationsNoop), 1);
    }

    #[tokio::test]
    async fn test_termination_status_follows_source() {
        let harness = setup_engine(default_resolver()).await;

        harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "1", ClaimSource::Manager))
            .await
            .unwrap();
        let events = harness
            .engine
            .apply_claim(&termination_claim(ClaimSource::SickLeave))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::DeactivatedSickLeaveSubmitted);
        assert_eq!(events[0].source, ClaimSource::SickLeave);
    }

    #[tokio::test]
    async fn test_multi_scope_independence() {
        let harness = setup_engine(
            default_resolver()
                .with_active("04040498765", "Fourth Person"),
        )
        .await;

        // Same employee, different employer
        let other_scope = Claim::Update(UpdateClaim {
            employer_org_id: "888888888".into(),
            employee_id: EMPLOYEE.into(),
            manager: ManagerContact {
                id: MANAGER_2.into(),
                phone: "5".into(),
                email: "other@acme.example".into(),
            },
            compensation: Compensation::Yes,
            active_from: None,
            active_to: None,
            source: ClaimSource::Manager,
        });

        harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "1", ClaimSource::Manager))
            .await
            .unwrap();
        harness.engine.apply_claim(&other_scope).await.unwrap();

        // Terminating one scope leaves the other untouched
        let events = harness
            .engine
            .apply_claim(&termination_claim(ClaimSource::Employee))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].employer_org_id, EMPLOYER);

        let mut conn = harness.pool.acquire().await.unwrap();
        let other_active =
            RelationshipStore::find_active_for_scope(&mut conn, &Scope::new(EMPLOYEE, "888888888"))
                .await
                .unwrap();
        assert_eq!(other_active.len(), 1);
        assert_eq!(other_active[0].manager_id, MANAGER_2);
    }

    #[tokio::test]
    async fn test_unknown_employee_rejected() {
        let harness = setup_engine(FakeResolver::new().with_active(MANAGER_1, "Kari Leder")).await;

        let err = harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "1", ClaimSource::Manager))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownIdentity(id) if id == EMPLOYEE));
        assert!(active_for_scope(&harness).await.is_empty());
        assert_eq!(harness.metrics.get(Counter::ClaimsFailed), 1);
    }

    #[tokio::test]
    async fn test_inactive_manager_rejected() {
        let harness = setup_engine(
            FakeResolver::new()
                .with_active(EMPLOYEE, "Ola Nordmann")
                .with_inactive(MANAGER_1),
        )
        .await;

        let err = harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "1", ClaimSource::Manager))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InactiveIdentity(id) if id == MANAGER_1));
    }

    #[tokio::test]
    async fn test_malformed_claim_rejected_before_any_io() {
        let harness = setup_engine(default_resolver()).await;

        let claim = Claim::Update(UpdateClaim {
            employer_org_id: EMPLOYER.into(),
            employee_id: String::new(),
            manager: ManagerContact {
                id: MANAGER_1.into(),
                phone: "1".into(),
                email: "x@y.z".into(),
            },
            compensation: Compensation::Unknown,
            active_from: None,
            active_to: None,
            source: ClaimSource::Manager,
        });

        let err = harness.engine.apply_claim(&claim).await.unwrap_err();
        assert!(matches!(err, Error::MalformedClaim(_)));
    }

    #[tokio::test]
    async fn test_explicit_active_from_preserved() {
        let harness = setup_engine(default_resolver()).await;

        let explicit: DateTime<Utc> = "2025-03-01T08:00:00Z".parse().unwrap();
        let claim = Claim::Update(UpdateClaim {
            employer_org_id: EMPLOYER.into(),
            employee_id: EMPLOYEE.into(),
            manager: ManagerContact {
                id: MANAGER_1.into(),
                phone: "1".into(),
                email: "x@acme.example".into(),
            },
            compensation: Compensation::No,
            active_from: Some(explicit),
            active_to: None,
            source: ClaimSource::IdentitySystem,
        });

        let events = harness.engine.apply_claim(&claim).await.unwrap();
        assert_eq!(events[0].active_from, explicit);
        // Identity-system provenance announces itself as identity-changed
        assert_eq!(events[0].status, EventStatus::IdentityChanged);
    }

    #[tokio::test]
    async fn test_close_time_clamped_to_activation() {
        let harness = setup_engine(default_resolver()).await;

        harness
            .engine
            .apply_claim(&update_claim(MANAGER_1, "1", ClaimSource::Manager))
            .await
            .unwrap();

        // Termination timestamped before the relationship existed
        let early: DateTime<Utc> = "2000-01-01T00:00:00Z".parse().unwrap();
        let events = harness
            .engine
            .apply_claim(&Claim::Terminate(TerminationClaim {
                employer_org_id: EMPLOYER.into(),
                employee_id: EMPLOYEE.into(),
                terminated_at: early,
                source: ClaimSource::EmploymentEnded,
            }))
            .await
            .unwrap();

        let closed = &events[0];
        assert!(closed.active_to.unwrap() >= closed.active_from);
    }
}
