//! Derived domain events
//!
//! One event per store mutation: a flattened projection of the relationship
//! plus a status tag and the provenance of the claim that caused it.
//! Append-only, at-least-once, keyed by relationship id for partition
//! affinity. Unordered across scopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::claim::ClaimSource;
use crate::domain::relationship::{Compensation, NlRelationship};

/// State transition the event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventStatus {
    NewManager,
    DeactivatedByEmployee,
    DeactivatedByManager,
    DeactivatedEmploymentEnded,
    DeactivatedSickLeaveSubmitted,
    DeactivatedNewManager,
    IdentityChanged,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewManager => "new-manager",
            Self::DeactivatedByEmployee => "deactivated-by-employee",
            Self::DeactivatedByManager => "deactivated-by-manager",
            Self::DeactivatedEmploymentEnded => "deactivated-employment-ended",
            Self::DeactivatedSickLeaveSubmitted => "deactivated-sick-leave-submitted",
            Self::DeactivatedNewManager => "deactivated-new-manager",
            Self::IdentityChanged => "identity-changed",
        }
    }

    /// Status an explicit termination maps to, by provenance
    pub fn for_termination(source: ClaimSource) -> Self {
        match source {
            ClaimSource::Employee => Self::DeactivatedByEmployee,
            ClaimSource::Manager => Self::DeactivatedByManager,
            ClaimSource::EmploymentEnded => Self::DeactivatedEmploymentEnded,
            ClaimSource::SickLeave => Self::DeactivatedSickLeaveSubmitted,
            ClaimSource::IdentitySystem => Self::IdentityChanged,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flattened relationship projection emitted after each store mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedEvent {
    pub relationship_id: String,
    pub employee_id: String,
    pub employer_org_id: String,
    pub manager_id: String,
    pub manager_phone: String,
    pub manager_email: String,
    pub active_from: DateTime<Utc>,
    pub active_to: Option<DateTime<Utc>>,
    pub compensation: Compensation,
    pub status: EventStatus,
    pub source: ClaimSource,
    pub emitted_at: DateTime<Utc>,
}

impl DerivedEvent {
    /// Project a relationship (as of the mutation) into an event
    pub fn from_relationship(
        rel: &NlRelationship,
        status: EventStatus,
        source: ClaimSource,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            relationship_id: rel.id.clone(),
            employee_id: rel.employee_id.clone(),
            employer_org_id: rel.employer_org_id.clone(),
            manager_id: rel.manager_id.clone(),
            manager_phone: rel.manager_phone.clone(),
            manager_email: rel.manager_email.clone(),
            active_from: rel.active_from,
            active_to: rel.active_to,
            compensation: rel.compensation,
            status,
            source,
            emitted_at,
        }
    }

    /// Partition key for the downstream log
    pub fn partition_key(&self) -> &str {
        &self.relationship_id
    }
}
