//! Call document schema
//!
//! The shared document at `chats/{chatId}/call/current` is the only channel
//! between the two parties. On the wire it is a loose JSON object; here it is
//! parsed into a variant keyed on `status` and validated per status before
//! the session acts on it.

use crate::domain::call::value_object::{CallStatus, CallType, EndReason};
use crate::domain::media::IceCandidateInit;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::{Document, Fields, Precondition};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const FIELD_CALLER_UID: &str = "callerUid";
pub const FIELD_CALLEE_UID: &str = "calleeUid";
pub const FIELD_CALL_TYPE: &str = "callType";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_OFFER: &str = "offer";
pub const FIELD_ANSWER: &str = "answer";
pub const FIELD_ICE_CANDIDATE: &str = "iceCandidate";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_ANSWERED_AT: &str = "answeredAt";
pub const FIELD_ENDED_AT: &str = "endedAt";
pub const FIELD_CANCELLED_AT: &str = "cancelledAt";
pub const FIELD_END_REASON: &str = "endReason";

/// Latest ICE candidate broadcast by either side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateBroadcast {
    #[serde(flatten)]
    pub candidate: IceCandidateInit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_uid: Option<UserId>,
}

/// Document exactly as found in the store
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCallDocument {
    caller_uid: Option<UserId>,
    callee_uid: Option<UserId>,
    call_type: Option<CallType>,
    status: Option<CallStatus>,
    offer: Option<String>,
    answer: Option<String>,
    ice_candidate: Option<CandidateBroadcast>,
    timestamp: Option<DateTime<Utc>>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    end_reason: Option<EndReason>,
}

/// Status-specific part of the document
#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Ringing {
        offer: String,
    },
    Answered {
        offer: String,
        answer: String,
        answered_at: Option<DateTime<Utc>>,
    },
    Cancelled {
        cancelled_at: Option<DateTime<Utc>>,
    },
    Ended {
        reason: Option<EndReason>,
        answered_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    },
}

impl CallState {
    pub fn status(&self) -> CallStatus {
        match self {
            CallState::Ringing { .. } => CallStatus::Ringing,
            CallState::Answered { .. } => CallStatus::Answered,
            CallState::Cancelled { .. } => CallStatus::Cancelled,
            CallState::Ended { .. } => CallStatus::Ended,
        }
    }
}

/// Validated call document
#[derive(Debug, Clone, PartialEq)]
pub struct CallDocument {
    pub caller_uid: UserId,
    pub callee_uid: UserId,
    pub call_type: CallType,
    pub state: CallState,
    pub ice_candidate: Option<CandidateBroadcast>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CallDocument {
    /// Parse and validate a stored document
    pub fn from_document(document: &Document) -> Result<Self> {
        let raw: RawCallDocument = serde_json::from_value(Value::Object(document.clone()))
            .map_err(|e| DomainError::MalformedDocument(e.to_string()))?;

        let caller_uid = raw.caller_uid.ok_or_else(|| missing(FIELD_CALLER_UID))?;
        let callee_uid = raw.callee_uid.ok_or_else(|| missing(FIELD_CALLEE_UID))?;
        let call_type = raw.call_type.ok_or_else(|| missing(FIELD_CALL_TYPE))?;
        let status = raw.status.ok_or_else(|| missing(FIELD_STATUS))?;

        let state = match status {
            CallStatus::Ringing => {
                if raw.answer.is_some() {
                    return Err(DomainError::MalformedDocument(
                        "answer present while ringing".to_string(),
                    ));
                }
                CallState::Ringing {
                    offer: raw.offer.ok_or_else(|| missing(FIELD_OFFER))?,
                }
            }
            CallStatus::Answered => CallState::Answered {
                offer: raw.offer.ok_or_else(|| missing(FIELD_OFFER))?,
                answer: raw.answer.ok_or_else(|| missing(FIELD_ANSWER))?,
                answered_at: raw.answered_at,
            },
            CallStatus::Cancelled => CallState::Cancelled {
                cancelled_at: raw.cancelled_at,
            },
            CallStatus::Ended => CallState::Ended {
                reason: raw.end_reason,
                answered_at: raw.answered_at,
                ended_at: raw.ended_at,
            },
        };

        Ok(Self {
            caller_uid,
            callee_uid,
            call_type,
            state,
            ice_candidate: raw.ice_candidate,
            timestamp: raw.timestamp,
        })
    }

    pub fn status(&self) -> CallStatus {
        self.state.status()
    }

    pub fn involves(&self, uid: &UserId) -> bool {
        &self.caller_uid == uid || &self.callee_uid == uid
    }

    /// A document without a timestamp cannot be trusted and counts as stale
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match self.timestamp {
            Some(ts) => now - ts > threshold,
            None => true,
        }
    }

    /// Candidate written by the other side, if any
    pub fn remote_candidate(&self, local_uid: &UserId) -> Option<&IceCandidateInit> {
        let broadcast = self.ice_candidate.as_ref()?;
        if broadcast.candidate.candidate.is_empty() {
            return None;
        }
        match &broadcast.sender_uid {
            Some(sender) if sender == local_uid => None,
            _ => Some(&broadcast.candidate),
        }
    }

    pub fn answered_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            CallState::Answered { answered_at, .. } | CallState::Ended { answered_at, .. } => {
                *answered_at
            }
            _ => None,
        }
    }

    // Writes. Each one touches only the fields its writer owns.

    /// Initial caller write
    pub fn ringing_fields(
        caller_uid: &UserId,
        callee_uid: &UserId,
        call_type: CallType,
        offer: &str,
    ) -> Fields {
        Fields::new()
            .set(FIELD_OFFER, offer)
            .set(FIELD_CALLER_UID, caller_uid.as_str())
            .set(FIELD_CALLEE_UID, callee_uid.as_str())
            .set(FIELD_CALL_TYPE, call_type.as_str())
            .set(FIELD_STATUS, CallStatus::Ringing.as_str())
            .server_timestamp(FIELD_TIMESTAMP)
    }

    /// Callee answer write
    pub fn answer_fields(answer: &str) -> Fields {
        Fields::new()
            .set(FIELD_ANSWER, answer)
            .set(FIELD_STATUS, CallStatus::Answered.as_str())
            .server_timestamp(FIELD_ANSWERED_AT)
            .server_timestamp(FIELD_TIMESTAMP)
    }

    pub fn cancel_fields() -> Fields {
        Fields::new()
            .set(FIELD_STATUS, CallStatus::Cancelled.as_str())
            .server_timestamp(FIELD_CANCELLED_AT)
    }

    pub fn end_fields(reason: EndReason) -> Fields {
        Fields::new()
            .set(FIELD_STATUS, CallStatus::Ended.as_str())
            .set(FIELD_END_REASON, reason.as_str())
            .server_timestamp(FIELD_ENDED_AT)
    }

    pub fn candidate_fields(candidate: &IceCandidateInit, sender_uid: &UserId) -> Fields {
        Fields::new()
            .set(
                FIELD_ICE_CANDIDATE,
                json!({
                    "candidate": candidate.candidate,
                    "sdpMid": candidate.sdp_mid,
                    "sdpMLineIndex": candidate.sdp_mline_index,
                    "senderUid": sender_uid.as_str(),
                }),
            )
            .server_timestamp(FIELD_TIMESTAMP)
    }

    pub fn status_is(status: CallStatus) -> Precondition {
        Precondition::field_equals(FIELD_STATUS, status.as_str())
    }
}

fn missing(field: &str) -> DomainError {
    DomainError::MalformedDocument(format!("missing {}", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ringing_doc() -> Document {
        CallDocument::ringing_fields(&"u1".into(), &"u2".into(), CallType::Audio, "O1")
            .resolve(Utc::now())
    }

    #[test]
    fn test_parse_ringing_document() {
        let doc = CallDocument::from_document(&ringing_doc()).unwrap();

        assert_eq!(doc.caller_uid.as_str(), "u1");
        assert_eq!(doc.callee_uid.as_str(), "u2");
        assert_eq!(doc.call_type, CallType::Audio);
        assert_eq!(doc.state, CallState::Ringing { offer: "O1".to_string() });
        assert!(doc.timestamp.is_some());
    }

    #[test]
    fn test_answer_while_ringing_is_rejected() {
        let mut raw = ringing_doc();
        raw.insert(FIELD_ANSWER.to_string(), json!("A1"));

        let err = CallDocument::from_document(&raw).unwrap_err();
        assert!(matches!(err, DomainError::MalformedDocument(_)));
    }

    #[test]
    fn test_answered_requires_answer() {
        let mut raw = ringing_doc();
        raw.insert(FIELD_STATUS.to_string(), json!("answered"));
        assert!(CallDocument::from_document(&raw).is_err());

        raw.extend(CallDocument::answer_fields("A1").resolve(Utc::now()));
        let doc = CallDocument::from_document(&raw).unwrap();
        assert_eq!(doc.status(), CallStatus::Answered);
        assert!(doc.answered_at().is_some());
    }

    #[test]
    fn test_missing_participants_is_malformed() {
        let mut raw = ringing_doc();
        raw.remove(FIELD_CALLEE_UID);
        assert!(CallDocument::from_document(&raw).is_err());
    }

    #[test]
    fn test_remote_candidate_skips_own_broadcast() {
        let mut raw = ringing_doc();
        let candidate = IceCandidateInit {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        raw.extend(CallDocument::candidate_fields(&candidate, &"u1".into()).resolve(Utc::now()));

        let doc = CallDocument::from_document(&raw).unwrap();
        assert!(doc.remote_candidate(&"u1".into()).is_none());
        assert_eq!(doc.remote_candidate(&"u2".into()), Some(&candidate));
    }

    #[test]
    fn test_empty_candidate_is_ignored() {
        let mut raw = ringing_doc();
        raw.insert(FIELD_ICE_CANDIDATE.to_string(), json!({ "candidate": "" }));

        let doc = CallDocument::from_document(&raw).unwrap();
        assert!(doc.remote_candidate(&"u2".into()).is_none());
    }

    #[test]
    fn test_staleness() {
        let doc = CallDocument::from_document(&ringing_doc()).unwrap();
        let threshold = Duration::minutes(5);

        assert!(!doc.is_stale(Utc::now(), threshold));
        assert!(doc.is_stale(Utc::now() + Duration::minutes(6), threshold));

        let mut untimed = doc.clone();
        untimed.timestamp = None;
        assert!(untimed.is_stale(Utc::now(), threshold));
    }

    #[test]
    fn test_ended_document_keeps_reason() {
        let mut raw = ringing_doc();
        raw.extend(CallDocument::end_fields(EndReason::Declined).resolve(Utc::now()));

        let doc = CallDocument::from_document(&raw).unwrap();
        match doc.state {
            CallState::Ended { reason, ended_at, .. } => {
                assert_eq!(reason, Some(EndReason::Declined));
                assert!(ended_at.is_some());
            }
            other => panic!("unexpected state {:?}", other),
        }
    }
}
