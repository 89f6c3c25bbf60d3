//! At-least-once ingestion of inbound records
//!
//! Each inbound stream (claims, identity changes) is consumed by one
//! [`IngestLoop`] reading an ordered [`RecordSource`], applying records
//! through the reconciliation engine strictly in order, and committing the
//! offset only after the record fully applied. A failing record blocks the
//! stream until it succeeds; the skip policy exists as an explicit escape
//! hatch for poison records that could never apply.

pub mod leader;
pub mod runner;
pub mod source;

pub use leader::{LeaderSignal, LeadershipMonitor, LeadershipState, StaticLeader};
pub use runner::{IngestLoop, OnErrorPolicy, RecordKind, RetryPolicy};
pub use source::{JsonlRecordSource, RecordSource, SourceRecord};
