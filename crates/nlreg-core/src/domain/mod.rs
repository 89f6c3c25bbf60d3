//! Domain model for the nearest-leader registry
//!
//! Leaves only: relationships, inbound claims, derived events, and identity
//! changes. No I/O lives here.

pub mod claim;
pub mod event;
pub mod identity;
pub mod relationship;

pub use claim::{Claim, ClaimSource, ManagerContact, TerminationClaim, UpdateClaim};
pub use event::{DerivedEvent, EventStatus};
pub use identity::{IdentifierEntry, IdentifierType, IdentityChange, VerifiedIdentity};
pub use relationship::{Compensation, NlRelationship, Scope};
