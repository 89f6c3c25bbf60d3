//! nlreg Core Library
//!
//! This crate maintains the authoritative record of nearest-leader (NL)
//! relationships between an employee on sick leave and their designated
//! workplace contact. It provides:
//! - Domain model (relationships, claims, derived events, identity changes)
//! - Relationship store (SQLite, transactional)
//! - Identity resolver (external registry + lookaside cache)
//! - Derived-event publication (at-least-once, keyed JSONL log)
//! - Reconciliation engine (single-active-relationship invariant enforcement)
//! - Identity-change cascade
//! - Ingestion loop (ordered, at-least-once, leader-gated consumption)

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod ingest;
pub mod metrics;
pub mod reconcile;
pub mod resolver;
pub mod storage;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::claim::{Claim, ClaimSource, TerminationClaim, UpdateClaim};
    pub use crate::domain::relationship::{Compensation, NlRelationship, Scope};
    pub use crate::error::{Error, Result};
    pub use crate::reconcile::ReconcileEngine;
}
