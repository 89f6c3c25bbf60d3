//! The nearest-leader relationship entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether the employer pays sick-leave compensation.
///
/// Tri-state on purpose: an unanswered question is not a "no". Serialized as
/// `true`/`false`/`null` on the wire and as `INTEGER NULL` in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Compensation {
    Yes,
    No,
    #[default]
    Unknown,
}

impl From<Option<bool>> for Compensation {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Self::Yes,
            Some(false) => Self::No,
            None => Self::Unknown,
        }
    }
}

impl From<Compensation> for Option<bool> {
    fn from(value: Compensation) -> Self {
        match value {
            Compensation::Yes => Some(true),
            Compensation::No => Some(false),
            Compensation::Unknown => None,
        }
    }
}

impl Compensation {
    /// Database representation (1 / 0 / NULL)
    pub fn as_db(self) -> Option<i64> {
        match self {
            Self::Yes => Some(1),
            Self::No => Some(0),
            Self::Unknown => None,
        }
    }

    pub fn from_db(value: Option<i64>) -> Self {
        match value {
            Some(0) => Self::No,
            Some(_) => Self::Yes,
            None => Self::Unknown,
        }
    }
}

/// The unit at which the single-active-relationship invariant is enforced:
/// one employee identifier paired with one employer organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub employee_id: String,
    pub employer_org_id: String,
}

impl Scope {
    pub fn new(employee_id: impl Into<String>, employer_org_id: impl Into<String>) -> Self {
        Self {
            employee_id: employee_id.into(),
            employer_org_id: employer_org_id.into(),
        }
    }
}

/// A nearest-leader relationship record
///
/// `id` is generated at creation and never changes across updates to the
/// same logical relationship. A record with `active_to = None` is currently
/// active; once `active_to` is set the record is closed and immutable.
/// Records are never physically deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlRelationship {
    pub id: String,
    pub employee_id: String,
    pub employer_org_id: String,
    pub manager_id: String,
    pub manager_phone: String,
    pub manager_email: String,
    pub compensation: Compensation,
    pub active_from: DateTime<Utc>,
    pub active_to: Option<DateTime<Utc>>,
    pub last_modified: DateTime<Utc>,
    /// Display name enriched from the identity resolver; may lag the registry.
    pub manager_display_name: Option<String>,
}

impl NlRelationship {
    /// Create a new active relationship with a freshly generated id
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        employee_id: impl Into<String>,
        employer_org_id: impl Into<String>,
        manager_id: impl Into<String>,
        manager_phone: impl Into<String>,
        manager_email: impl Into<String>,
        compensation: Compensation,
        active_from: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            employee_id: employee_id.into(),
            employer_org_id: employer_org_id.into(),
            manager_id: manager_id.into(),
            manager_phone: manager_phone.into(),
            manager_email: manager_email.into(),
            compensation,
            active_from,
            active_to: None,
            last_modified: now,
            manager_display_name: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active_to.is_none()
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.employee_id.clone(), self.employer_org_id.clone())
    }
}
