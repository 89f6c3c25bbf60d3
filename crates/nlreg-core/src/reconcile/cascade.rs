//! Identity-change cascade
//!
//! When the upstream identity system replaces a national id, stored
//! relationships referencing the superseded identifier are migrated to the
//! current one. The cascade synthesizes ordinary claims (source
//! identity-system) and re-applies them through the engine, so every
//! migration step goes through the same invariant-preserving path as any
//! other claim.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::claim::{Claim, ClaimSource, ManagerContact, TerminationClaim, UpdateClaim};
use crate::domain::event::DerivedEvent;
use crate::domain::identity::{IdentityChange, NationalIdReplacement};
use crate::domain::relationship::NlRelationship;
use crate::error::Result;
use crate::metrics::Counter;
use crate::reconcile::ReconcileEngine;

impl ReconcileEngine {
    /// Apply an identity-change notification to stored state.
    ///
    /// Changes that are not a same-type national-id replacement are ignored
    /// outright. The current identifier is resolved before any mutation;
    /// an unknown or inactive target aborts the cascade with zero changes so
    /// the notification can be retried once the registry has caught up.
    pub async fn apply_identity_change(
        &self,
        change: &IdentityChange,
    ) -> Result<Vec<DerivedEvent>> {
        let Some(replacement) = change.national_id_replacement() else {
            self.metrics().incr(Counter::CascadesIgnored);
            debug!("Identity change is not a national-id replacement, ignored");
            return Ok(Vec::new());
        };

        // Verify the target first. Failing here leaves the store untouched.
        self.resolver().resolve_active(&replacement.current).await?;

        let mut events = Vec::new();
        let mut touched = 0usize;

        for old_id in &replacement.superseded {
            touched += self
                .cascade_manager_side(old_id, &replacement, &mut events)
                .await?;
            touched += self
                .cascade_employee_side(old_id, &replacement, &mut events)
                .await?;
        }

        if touched == 0 {
            self.metrics().incr(Counter::CascadesIgnored);
            debug!(current = %replacement.current, "No stored relationships reference the superseded ids");
        } else {
            self.metrics().incr(Counter::CascadesApplied);
            info!(
                current = %replacement.current,
                relationships = touched,
                "Identity change cascaded to stored relationships"
            );
        }

        Ok(events)
    }

    /// Rows where the superseded id is the manager: re-apply as an update
    /// claim carrying the new manager id, everything else unchanged.
    async fn cascade_manager_side(
        &self,
        old_id: &str,
        replacement: &NationalIdReplacement,
        events: &mut Vec<DerivedEvent>,
    ) -> Result<usize> {
        let affected = self.store().find_active_by_manager(old_id).await?;

        for rel in &affected {
            warn!(
                relationship_id = %rel.id,
                employer = %rel.employer_org_id,
                "Manager identifier superseded, migrating relationship"
            );
            let claim = Claim::Update(migrated_update(rel, &rel.employee_id, &replacement.current));
            events.extend(self.apply_claim(&claim).await?);
        }

        Ok(affected.len())
    }

    /// Rows where the superseded id is the employee: close under the old id,
    /// then re-create the same relationship under the new id.
    async fn cascade_employee_side(
        &self,
        old_id: &str,
        replacement: &NationalIdReplacement,
        events: &mut Vec<DerivedEvent>,
    ) -> Result<usize> {
        let affected = self.store().find_active_by_employee(old_id).await?;

        for rel in &affected {
            warn!(
                relationship_id = %rel.id,
                employer = %rel.employer_org_id,
                "Employee identifier superseded, re-keying relationship"
            );

            let terminate = Claim::Terminate(TerminationClaim {
                employer_org_id: rel.employer_org_id.clone(),
                employee_id: rel.employee_id.clone(),
                terminated_at: Utc::now(),
                source: ClaimSource::IdentitySystem,
            });
            events.extend(self.apply_claim(&terminate).await?);

            let recreate = Claim::Update(migrated_update(rel, &replacement.current, &rel.manager_id));
            events.extend(self.apply_claim(&recreate).await?);
        }

        Ok(affected.len())
    }
}

/// Same relationship, possibly re-keyed on one side. Contact details,
/// compensation and the original activation time carry over.
fn migrated_update(rel: &NlRelationship, employee_id: &str, manager_id: &str) -> UpdateClaim {
    UpdateClaim {
        employer_org_id: rel.employer_org_id.clone(),
        employee_id: employee_id.to_string(),
        manager: ManagerContact {
            id: manager_id.to_string(),
            phone: rel.manager_phone.clone(),
            email: rel.manager_email.clone(),
        },
        compensation: rel.compensation,
        active_from: Some(rel.active_from),
        active_to: None,
        source: ClaimSource::IdentitySystem,
    }
}
