//! In-memory call history log

use crate::domain::call_history::{
    CallHistoryEntry, CallHistoryLogger, CallHistoryRepository, HistoryFilters,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Bounded append-only history kept in process memory
#[derive(Clone)]
pub struct MemoryCallHistoryLog {
    entries: Arc<RwLock<Vec<CallHistoryEntry>>>,
    max_entries: usize,
}

impl MemoryCallHistoryLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    /// Everything logged so far, oldest first
    pub async fn entries(&self) -> Vec<CallHistoryEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for MemoryCallHistoryLog {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait::async_trait]
impl CallHistoryLogger for MemoryCallHistoryLog {
    async fn append(&self, entry: &CallHistoryEntry) -> Result<(), String> {
        let mut entries = self.entries.write().await;

        entries.push(entry.clone());

        // Maintain max size (FIFO)
        while entries.len() > self.max_entries {
            entries.remove(0);
        }

        info!(
            chat_id = %entry.chat_id,
            status = entry.status.as_str(),
            duration = ?entry.duration,
            "Call history entry logged"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl CallHistoryRepository for MemoryCallHistoryLog {
    async fn list(
        &self,
        filters: HistoryFilters,
        limit: usize,
    ) -> Result<Vec<CallHistoryEntry>, String> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|entry| filters.matches(entry))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filters: HistoryFilters) -> Result<usize, String> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| filters.matches(entry)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::{CallType, Participants};
    use crate::domain::call_history::HistoryStatus;
    use crate::domain::shared::value_objects::ChatId;

    fn entry(chat: &str, caller: &str, callee: &str, status: HistoryStatus) -> CallHistoryEntry {
        CallHistoryEntry::new(
            ChatId::new(chat),
            &Participants::new(caller.into(), callee.into()),
            CallType::Audio,
            status,
        )
    }

    #[tokio::test]
    async fn test_append_and_list_newest_first() {
        let log = MemoryCallHistoryLog::default();
        log.append(&entry("c1", "u1", "u2", HistoryStatus::Missed)).await.unwrap();
        log.append(&entry("c1", "u2", "u1", HistoryStatus::Completed)).await.unwrap();
        log.append(&entry("c2", "u3", "u1", HistoryStatus::Declined)).await.unwrap();

        let chat = HistoryFilters {
            chat_id: Some(ChatId::new("c1")),
            ..Default::default()
        };
        let listed = log.list(chat, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].status, HistoryStatus::Completed);

        let user = HistoryFilters {
            participant: Some("u1".into()),
            ..Default::default()
        };
        assert_eq!(log.list(user, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missed_count() {
        let log = MemoryCallHistoryLog::default();
        log.append(&entry("c1", "u1", "u2", HistoryStatus::Missed)).await.unwrap();
        log.append(&entry("c1", "u1", "u2", HistoryStatus::Missed)).await.unwrap();
        log.append(&entry("c1", "u2", "u1", HistoryStatus::Missed)).await.unwrap();

        assert_eq!(log.count(HistoryFilters::missed_for("u2".into())).await.unwrap(), 2);
        assert_eq!(log.count(HistoryFilters::missed_for("u1".into())).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_max_entries() {
        let log = MemoryCallHistoryLog::new(2);
        for _ in 0..3 {
            log.append(&entry("c1", "u1", "u2", HistoryStatus::Missed)).await.unwrap();
        }
        assert_eq!(log.entries().await.len(), 2);
    }
}
