//! Domain events infrastructure

use crate::domain::shared::value_objects::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base trait for all domain events
pub trait DomainEvent: Send + Sync {
    /// Returns the event type name
    fn event_type(&self) -> &'static str;

    /// Returns when the event occurred
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Event metadata, stamped with the session that produced the event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub session_id: SessionId,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
}

impl EventMetadata {
    pub fn new(session_id: SessionId, event_type: &str) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id,
            occurred_at: Utc::now(),
            event_type: event_type.to_string(),
        }
    }
}
