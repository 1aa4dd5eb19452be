//! Call domain events

use crate::domain::call::entity::Participants;
use crate::domain::call::value_object::{CallRole, CallType, TerminationReason};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::ChatId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base struct for all call events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEventBase {
    pub metadata: EventMetadata,
    pub chat_id: ChatId,
}

/// Local session started ringing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInitiated {
    pub base: CallEventBase,
    pub role: CallRole,
    pub participants: Participants,
    pub call_type: CallType,
}

impl DomainEvent for CallInitiated {
    fn event_type(&self) -> &'static str {
        "call.initiated"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.base.metadata.occurred_at
    }
}

/// Offer/answer exchange completed locally
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAnswered {
    pub base: CallEventBase,
    pub answered_at: DateTime<Utc>,
}

impl DomainEvent for CallAnswered {
    fn event_type(&self) -> &'static str {
        "call.answered"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.base.metadata.occurred_at
    }
}

/// Local session returned to idle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnded {
    pub base: CallEventBase,
    pub reason: TerminationReason,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
}

impl DomainEvent for CallEnded {
    fn event_type(&self) -> &'static str {
        "call.ended"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.base.metadata.occurred_at
    }
}

/// Union of all call events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallEvent {
    Initiated(CallInitiated),
    Answered(CallAnswered),
    Ended(CallEnded),
}

impl CallEvent {
    pub fn chat_id(&self) -> &ChatId {
        match self {
            CallEvent::Initiated(e) => &e.base.chat_id,
            CallEvent::Answered(e) => &e.base.chat_id,
            CallEvent::Ended(e) => &e.base.chat_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            CallEvent::Initiated(e) => e.event_type(),
            CallEvent::Answered(e) => e.event_type(),
            CallEvent::Ended(e) => e.event_type(),
        }
    }
}
