//! Reconciliation of inbound claims against stored relationship state
//!
//! The engine is the only writer of relationship rows. All mutations for one
//! claim happen inside one database transaction; derived events are published
//! after commit (not atomically with it, see the crate docs on at-least-once
//! semantics).

pub mod cascade;
pub mod engine;

pub use engine::ReconcileEngine;
