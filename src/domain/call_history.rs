//! Call history domain model
//!
//! Append-only records of how each call attempt ended. The call core only
//! produces entries; storage and presentation belong to the history log.

use crate::domain::call::entity::Participants;
use crate::domain::call::value_object::{CallType, TerminationReason};
use crate::domain::shared::value_objects::{ChatId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Call history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryEntry {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub caller_uid: UserId,
    pub callee_uid: UserId,
    pub call_type: CallType,
    pub status: HistoryStatus,
    /// Seconds between answer and hangup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Terminal outcome recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Completed,
    Missed,
    Declined,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Completed => "completed",
            HistoryStatus::Missed => "missed",
            HistoryStatus::Declined => "declined",
            HistoryStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(HistoryStatus::Completed),
            "missed" => Some(HistoryStatus::Missed),
            "declined" => Some(HistoryStatus::Declined),
            "failed" => Some(HistoryStatus::Failed),
            _ => None,
        }
    }

    /// History outcome for a session this side terminated
    pub fn for_local_termination(reason: &TerminationReason) -> Option<Self> {
        match reason {
            TerminationReason::Hangup => Some(HistoryStatus::Completed),
            TerminationReason::Cancelled | TerminationReason::Missed => Some(HistoryStatus::Missed),
            TerminationReason::Declined => Some(HistoryStatus::Declined),
            TerminationReason::Failed(_) => Some(HistoryStatus::Failed),
            TerminationReason::LocalStop
            | TerminationReason::RemoteHangup
            | TerminationReason::DocumentDeleted => None,
        }
    }
}

impl CallHistoryEntry {
    pub fn new(
        chat_id: ChatId,
        participants: &Participants,
        call_type: CallType,
        status: HistoryStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            chat_id,
            caller_uid: participants.caller().clone(),
            callee_uid: participants.callee().clone(),
            call_type,
            status,
            duration: None,
            start_time: now,
            end_time: None,
            created_at: now,
        }
    }

    /// Record when the call started and ended
    pub fn with_times(mut self, started: DateTime<Utc>, ended: DateTime<Utc>) -> Self {
        self.start_time = started;
        self.end_time = Some(ended);
        self
    }

    pub fn with_duration(mut self, seconds: i64) -> Self {
        self.duration = Some(seconds.max(0));
        self
    }

    pub fn involves(&self, uid: &UserId) -> bool {
        &self.caller_uid == uid || &self.callee_uid == uid
    }
}

/// History log the call core appends to
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CallHistoryLogger: Send + Sync {
    async fn append(&self, entry: &CallHistoryEntry) -> Result<(), String>;
}

/// Read side of the history log
#[async_trait::async_trait]
pub trait CallHistoryRepository: Send + Sync {
    /// Newest first
    async fn list(&self, filters: HistoryFilters, limit: usize) -> Result<Vec<CallHistoryEntry>, String>;

    async fn count(&self, filters: HistoryFilters) -> Result<usize, String>;
}

/// Filters for history queries
#[derive(Debug, Clone, Default)]
pub struct HistoryFilters {
    pub chat_id: Option<ChatId>,
    /// Either party
    pub participant: Option<UserId>,
    pub callee_uid: Option<UserId>,
    pub status: Option<HistoryStatus>,
}

impl HistoryFilters {
    pub fn matches(&self, entry: &CallHistoryEntry) -> bool {
        self.chat_id.as_ref().map_or(true, |c| &entry.chat_id == c)
            && self.participant.as_ref().map_or(true, |u| entry.involves(u))
            && self.callee_uid.as_ref().map_or(true, |u| &entry.callee_uid == u)
            && self.status.map_or(true, |s| entry.status == s)
    }

    /// Missed calls received by `uid`
    pub fn missed_for(uid: UserId) -> Self {
        Self {
            callee_uid: Some(uid),
            status: Some(HistoryStatus::Missed),
            ..Default::default()
        }
    }
}
