//! Inbound claims
//!
//! A claim is an instruction to create/update or terminate a relationship.
//! Claims arrive over the ingestion streams as JSON. The surrounding API
//! layer should already have rejected junk, but the core validates again
//! and never proceeds with partial data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::relationship::{Compensation, Scope};
use crate::error::{Error, Result};

/// Provenance: which upstream actor/system caused a mutation. Carried into
/// derived events for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimSource {
    Employee,
    Manager,
    EmploymentEnded,
    SickLeave,
    IdentitySystem,
}

impl ClaimSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Manager => "manager",
            Self::EmploymentEnded => "employment-ended",
            Self::SickLeave => "sick-leave",
            Self::IdentitySystem => "identity-system",
        }
    }
}

impl std::fmt::Display for ClaimSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manager identifier and contact fields carried by an update claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerContact {
    pub id: String,
    pub phone: String,
    pub email: String,
}

/// A proposed active relationship for one (employee, employer) scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateClaim {
    pub employer_org_id: String,
    pub employee_id: String,
    pub manager: ManagerContact,
    #[serde(default)]
    pub compensation: Compensation,
    /// Explicit activation time; defaults to processing time when absent
    #[serde(default)]
    pub active_from: Option<DateTime<Utc>>,
    /// Explicit close time for relationships this claim supersedes
    #[serde(default)]
    pub active_to: Option<DateTime<Utc>>,
    pub source: ClaimSource,
}

/// An explicit termination of whatever is active in one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationClaim {
    pub employer_org_id: String,
    pub employee_id: String,
    pub terminated_at: DateTime<Utc>,
    pub source: ClaimSource,
}

/// One inbound instruction to the reconciliation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Claim {
    Update(UpdateClaim),
    Terminate(TerminationClaim),
}

impl Claim {
    /// Reject claims missing required identifiers with `MalformedClaim`
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Update(u) => {
                require(&u.employee_id, "employee_id")?;
                require(&u.employer_org_id, "employer_org_id")?;
                require(&u.manager.id, "manager.id")?;
            }
            Self::Terminate(t) => {
                require(&t.employee_id, "employee_id")?;
                require(&t.employer_org_id, "employer_org_id")?;
            }
        }
        Ok(())
    }

    pub fn scope(&self) -> Scope {
        match self {
            Self::Update(u) => Scope::new(u.employee_id.clone(), u.employer_org_id.clone()),
            Self::Terminate(t) => Scope::new(t.employee_id.clone(), t.employer_org_id.clone()),
        }
    }

    pub fn source(&self) -> ClaimSource {
        match self {
            Self::Update(u) => u.source,
            Self::Terminate(t) => t.source,
        }
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::MalformedClaim(format!("missing required field '{}'", field)));
    }
    Ok(())
}
