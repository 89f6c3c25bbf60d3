//! Identity-change notifications and resolved identities
//!
//! An identity change is ephemeral input from the upstream identity system
//! describing a merge/split; the core consumes it once and does not persist
//! it.

use serde::{Deserialize, Serialize};

/// Kind of personal identifier in an identity-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentifierType {
    NationalId,
    ActorId,
    Other,
}

/// One identifier in an identity-change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifierEntry {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    pub is_current: bool,
}

/// An upstream identity merge/split notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityChange {
    pub identifiers: Vec<IdentifierEntry>,
}

/// A national-id replacement extracted from an identity change: one current
/// identifier superseding one or more old ones.
#[derive(Debug, Clone, PartialEq)]
pub struct NationalIdReplacement {
    pub superseded: Vec<String>,
    pub current: String,
}

impl IdentityChange {
    /// Extract the national-id replacement, if one actually occurred.
    ///
    /// Returns None unless at least two NATIONAL_ID identifiers are present
    /// with exactly one marked current; anything else is not a same-type
    /// replacement and the whole notification is ignored.
    pub fn national_id_replacement(&self) -> Option<NationalIdReplacement> {
        let national: Vec<&IdentifierEntry> = self
            .identifiers
            .iter()
            .filter(|e| e.identifier_type == IdentifierType::NationalId)
            .collect();

        if national.len() < 2 {
            return None;
        }

        let current: Vec<&IdentifierEntry> = national.iter().filter(|e| e.is_current).copied().collect();
        if current.len() != 1 {
            return None;
        }

        let superseded: Vec<String> = national
            .iter()
            .filter(|e| !e.is_current)
            .map(|e| e.identifier.clone())
            .collect();

        Some(NationalIdReplacement {
            superseded,
            current: current[0].identifier.clone(),
        })
    }
}

/// Identity resolved against the external registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedIdentity {
    /// Stable identity id in the registry
    pub identity_id: String,
    pub display_name: String,
    /// False when the identity has been superseded or otherwise retired
    pub active: bool,
}
