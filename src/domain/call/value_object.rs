//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Media kind requested for a call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Audio => "audio",
            CallType::Video => "video",
        }
    }

    pub fn wants_video(&self) -> bool {
        matches!(self, CallType::Video)
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol status stored in the call document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Offer written, callee being alerted
    Ringing,
    /// Answer written by the callee
    Answered,
    /// Caller gave up before an answer
    Cancelled,
    /// Hung up or declined
    Ended,
}

impl CallStatus {
    /// Status only ever moves forward for one call attempt
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;

        match (self, next) {
            (Ringing, Answered) => true,
            (Ringing, Cancelled) => true,
            // Decline ends a call that was never answered
            (Ringing, Ended) => true,
            (Answered, Ended) => true,

            // Terminal states
            (Cancelled, _) | (Ended, _) => false,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Cancelled | CallStatus::Ended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Cancelled => "cancelled",
            CallStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an answered or declined call was ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Hangup,
    Declined,
    Failed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::Declined => "declined",
            EndReason::Failed => "failed",
        }
    }
}

/// Which side of the call a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    Caller,
    Callee,
}

impl CallRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallRole::Caller => "caller",
            CallRole::Callee => "callee",
        }
    }
}

/// Local session phase as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Ringing,
    Active,
}

impl SessionPhase {
    pub fn can_transition_to(&self, next: SessionPhase) -> bool {
        use SessionPhase::*;

        matches!(
            (self, next),
            (Idle, Ringing) | (Ringing, Active) | (Ringing, Idle) | (Active, Idle)
        )
    }
}

/// Why a local session unwound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// This side released the session without touching the document
    LocalStop,
    /// This side hung up an answered call
    Hangup,
    /// Caller cancelled before an answer
    Cancelled,
    /// Callee declined
    Declined,
    /// Nobody answered before the ring timeout
    Missed,
    /// Other side hung up
    RemoteHangup,
    /// Document vanished without a terminal status
    DocumentDeleted,
    /// Negotiation failed
    Failed(String),
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::LocalStop => "local_stop",
            TerminationReason::Hangup => "hangup",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::Declined => "declined",
            TerminationReason::Missed => "missed",
            TerminationReason::RemoteHangup => "remote_hangup",
            TerminationReason::DocumentDeleted => "document_deleted",
            TerminationReason::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_status_transitions() {
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Answered));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Cancelled));
        assert!(CallStatus::Ringing.can_transition_to(CallStatus::Ended));
        assert!(CallStatus::Answered.can_transition_to(CallStatus::Ended));
    }

    #[test]
    fn test_terminal_statuses_never_reopen() {
        for terminal in [CallStatus::Cancelled, CallStatus::Ended] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(CallStatus::Ringing));
            assert!(!terminal.can_transition_to(CallStatus::Answered));
        }
        assert!(!CallStatus::Answered.can_transition_to(CallStatus::Cancelled));
        assert!(!CallStatus::Answered.can_transition_to(CallStatus::Ringing));
    }

    #[test]
    fn test_session_phase_transitions() {
        assert!(SessionPhase::Idle.can_transition_to(SessionPhase::Ringing));
        assert!(SessionPhase::Ringing.can_transition_to(SessionPhase::Active));
        assert!(SessionPhase::Ringing.can_transition_to(SessionPhase::Idle));
        assert!(SessionPhase::Active.can_transition_to(SessionPhase::Idle));
        assert!(!SessionPhase::Idle.can_transition_to(SessionPhase::Active));
        assert!(!SessionPhase::Active.can_transition_to(SessionPhase::Ringing));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&CallType::Video).unwrap(), "\"video\"");
        assert_eq!(serde_json::to_string(&CallStatus::Cancelled).unwrap(), "\"cancelled\"");
        let status: CallStatus = serde_json::from_str("\"answered\"").unwrap();
        assert_eq!(status, CallStatus::Answered);
    }
}
