//! Call history queries

use crate::application::call::error::{CallError, CallResult};
use crate::domain::call_history::{CallHistoryEntry, CallHistoryRepository, HistoryFilters};
use crate::domain::shared::value_objects::{ChatId, UserId};
use std::sync::Arc;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Read access to the call history log
pub struct CallHistoryService {
    repository: Arc<dyn CallHistoryRepository>,
}

impl CallHistoryService {
    pub fn new(repository: Arc<dyn CallHistoryRepository>) -> Self {
        Self { repository }
    }

    /// Calls `uid` took part in, newest first
    pub async fn user_history(&self, uid: &UserId, limit: usize) -> CallResult<Vec<CallHistoryEntry>> {
        let filters = HistoryFilters {
            participant: Some(uid.clone()),
            ..Default::default()
        };
        self.list(filters, limit).await
    }

    /// Calls placed in one chat, newest first
    pub async fn chat_history(&self, chat_id: &ChatId, limit: usize) -> CallResult<Vec<CallHistoryEntry>> {
        let filters = HistoryFilters {
            chat_id: Some(chat_id.clone()),
            ..Default::default()
        };
        self.list(filters, limit).await
    }

    pub async fn missed_call_count(&self, uid: &UserId) -> CallResult<usize> {
        self.repository
            .count(HistoryFilters::missed_for(uid.clone()))
            .await
            .map_err(CallError::InvalidState)
    }

    async fn list(&self, filters: HistoryFilters, limit: usize) -> CallResult<Vec<CallHistoryEntry>> {
        let limit = if limit == 0 { DEFAULT_HISTORY_LIMIT } else { limit };
        self.repository
            .list(filters, limit)
            .await
            .map_err(CallError::InvalidState)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::{CallType, Participants};
    use crate::domain::call_history::{CallHistoryLogger, HistoryStatus};
    use crate::infrastructure::history::MemoryCallHistoryLog;

    async fn seeded() -> CallHistoryService {
        let log = MemoryCallHistoryLog::default();
        for (chat, caller, callee, status) in [
            ("c1", "u1", "u2", HistoryStatus::Completed),
            ("c1", "u1", "u2", HistoryStatus::Missed),
            ("c2", "u3", "u2", HistoryStatus::Missed),
            ("c3", "u3", "u4", HistoryStatus::Declined),
        ] {
            let entry = CallHistoryEntry::new(
                ChatId::new(chat),
                &Participants::new(caller.into(), callee.into()),
                CallType::Audio,
                status,
            );
            log.append(&entry).await.unwrap();
        }
        CallHistoryService::new(Arc::new(log))
    }

    #[tokio::test]
    async fn test_user_and_chat_history() {
        let service = seeded().await;

        let user = service.user_history(&"u2".into(), 10).await.unwrap();
        assert_eq!(user.len(), 3);
        assert_eq!(user[0].chat_id, ChatId::new("c2"));

        let chat = service.chat_history(&ChatId::new("c1"), 1).await.unwrap();
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].status, HistoryStatus::Missed);
    }

    #[tokio::test]
    async fn test_missed_call_count() {
        let service = seeded().await;
        assert_eq!(service.missed_call_count(&"u2".into()).await.unwrap(), 2);
        assert_eq!(service.missed_call_count(&"u1".into()).await.unwrap(), 0);
    }
}
