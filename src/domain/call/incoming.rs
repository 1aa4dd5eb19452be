//! Incoming call detection
//!
//! Every merge into the call document (ICE candidates in particular) produces
//! a new snapshot. The filter turns that stream into at most one `Incoming`
//! per distinct (status, callee) pair and a matching `Cleared` when the call
//! goes away.

use crate::domain::call::document::CallDocument;
use crate::domain::call::value_object::{CallStatus, CallType};
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::Document;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingCallEvent {
    /// A call addressed to the watching user started ringing
    Incoming { caller_uid: UserId, call_type: CallType },
    /// A surfaced call stopped ringing; `None` when the document was deleted
    Cleared { status: Option<CallStatus> },
}

pub struct IncomingCallFilter {
    uid: UserId,
    stale_after: Duration,
    last_key: Option<(CallStatus, UserId)>,
    surfaced: bool,
}

impl IncomingCallFilter {
    pub fn new(uid: UserId, stale_after: Duration) -> Self {
        Self {
            uid,
            stale_after,
            last_key: None,
            surfaced: false,
        }
    }

    pub fn is_surfaced(&self) -> bool {
        self.surfaced
    }

    /// Feed one snapshot; returns the event to surface, if any
    pub fn observe(
        &mut self,
        document: Option<&Document>,
        now: DateTime<Utc>,
    ) -> Option<IncomingCallEvent> {
        let Some(raw) = document else {
            self.last_key = None;
            return self.clear(None);
        };

        let doc = CallDocument::from_document(raw).ok()?;
        let key = (doc.status(), doc.callee_uid.clone());
        if self.last_key.as_ref() == Some(&key) {
            return None;
        }
        self.last_key = Some(key);

        match doc.status() {
            CallStatus::Ringing => {
                if doc.callee_uid != self.uid || doc.is_stale(now, self.stale_after) {
                    return None;
                }
                self.surfaced = true;
                Some(IncomingCallEvent::Incoming {
                    caller_uid: doc.caller_uid,
                    call_type: doc.call_type,
                })
            }
            status => self.clear(Some(status)),
        }
    }

    fn clear(&mut self, status: Option<CallStatus>) -> Option<IncomingCallEvent> {
        if !self.surfaced {
            return None;
        }
        self.surfaced = false;
        Some(IncomingCallEvent::Cleared { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::document::FIELD_TIMESTAMP;
    use crate::domain::media::IceCandidateInit;
    use serde_json::json;

    fn ringing(callee: &str) -> Document {
        CallDocument::ringing_fields(&"u1".into(), &callee.into(), CallType::Video, "O1")
            .resolve(Utc::now())
    }

    fn filter() -> IncomingCallFilter {
        IncomingCallFilter::new("u2".into(), Duration::minutes(5))
    }

    #[test]
    fn test_fires_once_per_ringing() {
        let mut filter = filter();
        let mut doc = ringing("u2");

        let first = filter.observe(Some(&doc), Utc::now());
        assert_eq!(
            first,
            Some(IncomingCallEvent::Incoming {
                caller_uid: "u1".into(),
                call_type: CallType::Video,
            })
        );

        // Same snapshot again, then an ICE merge
        assert_eq!(filter.observe(Some(&doc), Utc::now()), None);
        let candidate = IceCandidateInit {
            candidate: "candidate:1".to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        };
        doc.extend(CallDocument::candidate_fields(&candidate, &"u1".into()).resolve(Utc::now()));
        assert_eq!(filter.observe(Some(&doc), Utc::now()), None);
    }

    #[test]
    fn test_ignores_calls_for_someone_else() {
        let mut filter = filter();
        assert_eq!(filter.observe(Some(&ringing("u3")), Utc::now()), None);
        assert!(!filter.is_surfaced());
    }

    #[test]
    fn test_cleared_on_cancel_and_delete() {
        let mut filter = filter();
        let mut doc = ringing("u2");
        filter.observe(Some(&doc), Utc::now());

        doc.extend(CallDocument::cancel_fields().resolve(Utc::now()));
        assert_eq!(
            filter.observe(Some(&doc), Utc::now()),
            Some(IncomingCallEvent::Cleared {
                status: Some(CallStatus::Cancelled)
            })
        );

        // Deletion after the clear stays quiet
        assert_eq!(filter.observe(None, Utc::now()), None);
    }

    #[test]
    fn test_delete_while_ringing_clears() {
        let mut filter = filter();
        filter.observe(Some(&ringing("u2")), Utc::now());
        assert_eq!(
            filter.observe(None, Utc::now()),
            Some(IncomingCallEvent::Cleared { status: None })
        );
    }

    #[test]
    fn test_next_attempt_fires_again_after_delete() {
        let mut filter = filter();
        filter.observe(Some(&ringing("u2")), Utc::now());
        filter.observe(None, Utc::now());
        assert!(filter.observe(Some(&ringing("u2")), Utc::now()).is_some());
    }

    #[test]
    fn test_stale_ringing_is_not_surfaced() {
        let mut filter = filter();
        let mut doc = ringing("u2");
        let old = Utc::now() - Duration::minutes(10);
        doc.insert(FIELD_TIMESTAMP.to_string(), json!(old.to_rfc3339()));

        assert_eq!(filter.observe(Some(&doc), Utc::now()), None);
    }
}
