//! Domain layer - Core call signaling rules
//!
//! This layer contains:
//! - Aggregates: the local call attempt
//! - Value Objects: statuses, roles, identifiers
//! - The call document schema shared by both parties
//! - Ports for the signaling store, the media engine and the history log
//! - Domain Events: things that happened to a call attempt

pub mod call;
pub mod call_history;
pub mod call_quality;
pub mod media;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{DomainError, Result};
