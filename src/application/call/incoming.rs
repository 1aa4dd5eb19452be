//! Incoming call watcher

use crate::domain::call::{IncomingCallEvent, IncomingCallFilter};
use crate::domain::shared::value_objects::ChatId;
use crate::domain::signaling::Subscription;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Long-lived watch over one chat's call document
///
/// Surfaces at most one `Incoming` per ringing call addressed to the
/// watching user. Dropping the watcher stops it.
pub struct IncomingCallWatcher {
    chat_id: ChatId,
    events: mpsc::UnboundedReceiver<IncomingCallEvent>,
    task: JoinHandle<()>,
}

impl IncomingCallWatcher {
    pub(crate) fn spawn(
        chat_id: ChatId,
        mut subscription: Subscription,
        mut filter: IncomingCallFilter,
    ) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let watched = chat_id.clone();

        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                let Some(event) = filter.observe(snapshot.data.as_ref(), Utc::now()) else {
                    continue;
                };
                match &event {
                    IncomingCallEvent::Incoming {
                        caller_uid,
                        call_type,
                    } => info!(
                        chat_id = %watched,
                        caller_uid = %caller_uid,
                        call_type = call_type.as_str(),
                        "Incoming call"
                    ),
                    IncomingCallEvent::Cleared { status } => {
                        debug!(chat_id = %watched, ?status, "Incoming call cleared")
                    }
                }
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Self {
            chat_id,
            events,
            task,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Next event; `None` once the watcher has stopped
    pub async fn next(&mut self) -> Option<IncomingCallEvent> {
        self.events.recv().await
    }

    /// Event already delivered, without waiting
    pub fn try_next(&mut self) -> Option<IncomingCallEvent> {
        self.events.try_recv().ok()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for IncomingCallWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::{CallDocument, CallType};
    use crate::domain::shared::value_objects::UserId;
    use crate::domain::signaling::{DocumentPath, SignalingStore};
    use crate::infrastructure::signaling::InMemorySignalingStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watcher_surfaces_ringing_call_once() {
        let store = InMemorySignalingStore::new();
        let chat_id = ChatId::new("c1");
        let path = DocumentPath::current_call(&chat_id);
        let subscription = store.subscribe(&path).await.unwrap();
        let filter = IncomingCallFilter::new(UserId::new("u2"), chrono::Duration::minutes(5));
        let mut watcher = IncomingCallWatcher::spawn(chat_id, subscription, filter);

        store
            .write(
                &path,
                CallDocument::ringing_fields(&"u1".into(), &"u2".into(), CallType::Audio, "O1"),
                false,
            )
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), watcher.next())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(IncomingCallEvent::Incoming {
                caller_uid: "u1".into(),
                call_type: CallType::Audio,
            })
        );

        store.delete(&path).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), watcher.next())
            .await
            .unwrap();
        assert_eq!(event, Some(IncomingCallEvent::Cleared { status: None }));
    }

    #[tokio::test]
    async fn test_dropping_watcher_releases_subscription() {
        let store = InMemorySignalingStore::new();
        let chat_id = ChatId::new("c1");
        let path = DocumentPath::current_call(&chat_id);
        let subscription = store.subscribe(&path).await.unwrap();
        let filter = IncomingCallFilter::new(UserId::new("u2"), chrono::Duration::minutes(5));
        let watcher = IncomingCallWatcher::spawn(chat_id, subscription, filter);

        drop(watcher);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.subscriber_count(&path).await, 0);
    }
}
