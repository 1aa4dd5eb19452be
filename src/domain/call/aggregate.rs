//! Call attempt aggregate root

use crate::domain::call::entity::Participants;
use crate::domain::call::event::{CallAnswered, CallEnded, CallEvent, CallEventBase, CallInitiated};
use crate::domain::call::value_object::{CallRole, CallType, SessionPhase, TerminationReason};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::events::EventMetadata;
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::{ChatId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One side's view of a single call attempt
///
/// Owned by the session handler; the phase only moves along
/// `idle -> ringing -> active -> idle` or `idle -> ringing -> idle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAttempt {
    session_id: SessionId,
    chat_id: ChatId,
    role: CallRole,
    participants: Participants,
    call_type: CallType,
    phase: SessionPhase,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    termination: Option<TerminationReason>,
    #[serde(skip)]
    events: Vec<CallEvent>,
}

impl CallAttempt {
    pub fn new(
        session_id: SessionId,
        chat_id: ChatId,
        role: CallRole,
        participants: Participants,
        call_type: CallType,
    ) -> Self {
        Self {
            session_id,
            chat_id,
            role,
            participants,
            call_type,
            phase: SessionPhase::Idle,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            termination: None,
            events: Vec::new(),
        }
    }

    /// Offer written (caller) or incoming call taken up (callee)
    pub fn ring(&mut self) -> Result<()> {
        self.transition_to(SessionPhase::Ringing)?;

        self.record_event(CallEvent::Initiated(CallInitiated {
            base: self.event_base("call.initiated"),
            role: self.role,
            participants: self.participants.clone(),
            call_type: self.call_type,
        }));

        Ok(())
    }

    /// Offer/answer exchange completed
    pub fn answer(&mut self) -> Result<()> {
        self.transition_to(SessionPhase::Active)?;
        let answered_at = Utc::now();
        self.answered_at = Some(answered_at);

        self.record_event(CallEvent::Answered(CallAnswered {
            base: self.event_base("call.answered"),
            answered_at,
        }));

        Ok(())
    }

    pub fn terminate(&mut self, reason: TerminationReason) -> Result<()> {
        if self.termination.is_some() {
            return Err(DomainError::InvalidStateTransition(
                "Call attempt already terminated".to_string(),
            ));
        }
        self.transition_to(SessionPhase::Idle)?;
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);
        self.termination = Some(reason.clone());

        let duration_seconds = self.answered_at.map(|answered| (ended_at - answered).num_seconds());

        self.record_event(CallEvent::Ended(CallEnded {
            base: self.event_base("call.ended"),
            reason,
            ended_at,
            duration_seconds,
        }));

        Ok(())
    }

    fn transition_to(&mut self, next: SessionPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot transition from {:?} to {:?}",
                self.phase, next
            )));
        }

        self.phase = next;
        Ok(())
    }

    fn event_base(&self, event_type: &str) -> CallEventBase {
        CallEventBase {
            metadata: EventMetadata::new(self.session_id, event_type),
            chat_id: self.chat_id.clone(),
        }
    }

    fn record_event(&mut self, event: CallEvent) {
        self.events.push(event);
    }

    /// Take all pending events
    pub fn take_events(&mut self) -> Vec<CallEvent> {
        std::mem::take(&mut self.events)
    }

    // Getters
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn answered_at(&self) -> Option<DateTime<Utc>> {
        self.answered_at
    }

    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.termination.is_some()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.answered_at
            .and_then(|answered| self.ended_at.map(|ended| ended - answered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_attempt(role: CallRole) -> CallAttempt {
        CallAttempt::new(
            SessionId::new(),
            ChatId::new("c1"),
            role,
            Participants::new("u1".into(), "u2".into()),
            CallType::Audio,
        )
    }

    #[test]
    fn test_call_lifecycle() {
        let mut attempt = create_test_attempt(CallRole::Caller);
        assert_eq!(attempt.phase(), SessionPhase::Idle);

        attempt.ring().unwrap();
        assert_eq!(attempt.phase(), SessionPhase::Ringing);

        attempt.answer().unwrap();
        assert_eq!(attempt.phase(), SessionPhase::Active);
        assert!(attempt.answered_at().is_some());

        attempt.terminate(TerminationReason::LocalStop).unwrap();
        assert_eq!(attempt.phase(), SessionPhase::Idle);
        assert!(attempt.is_finished());
        assert!(attempt.duration().is_some());

        let events = attempt.take_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].event_type(), "call.ended");
    }

    #[test]
    fn test_cancelled_before_answer_has_no_duration() {
        let mut attempt = create_test_attempt(CallRole::Callee);
        attempt.ring().unwrap();
        attempt.terminate(TerminationReason::Cancelled).unwrap();

        assert!(attempt.duration().is_none());
        assert_eq!(attempt.termination(), Some(&TerminationReason::Cancelled));
    }

    #[test]
    fn test_cannot_answer_without_ringing() {
        let mut attempt = create_test_attempt(CallRole::Caller);
        assert!(attempt.answer().is_err());
    }

    #[test]
    fn test_terminate_only_once() {
        let mut attempt = create_test_attempt(CallRole::Caller);
        attempt.ring().unwrap();
        attempt.terminate(TerminationReason::Missed).unwrap();

        let result = attempt.terminate(TerminationReason::LocalStop);
        assert!(result.is_err());
        assert_eq!(attempt.termination(), Some(&TerminationReason::Missed));
    }
}
