//! In-memory signaling store
//!
//! Process-local stand-in for the hosted document store. Writes are applied
//! and fanned out to subscribers under one lock, so every subscriber sees
//! snapshots in commit order.

use crate::domain::signaling::{
    Document, DocumentPath, Fields, Precondition, SignalingStore, Snapshot, StoreError,
    StoreResult, Subscription,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOpKind {
    Create,
    Write,
    Merge,
    Update,
    Delete,
}

/// One committed mutation, kept for inspection
#[derive(Debug, Clone)]
pub struct StoreOp {
    pub path: DocumentPath,
    pub kind: StoreOpKind,
    /// Field names touched by the mutation
    pub fields: Vec<String>,
}

impl StoreOp {
    pub fn touches(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

#[derive(Default)]
struct StoreState {
    documents: HashMap<DocumentPath, Document>,
    subscribers: HashMap<DocumentPath, Vec<mpsc::UnboundedSender<Snapshot>>>,
    log: Vec<StoreOp>,
}

impl StoreState {
    fn commit(&mut self, path: &DocumentPath, kind: StoreOpKind, fields: Vec<String>) {
        self.log.push(StoreOp {
            path: path.clone(),
            kind,
            fields,
        });

        let snapshot = Snapshot {
            path: path.clone(),
            data: self.documents.get(path).cloned(),
        };

        if let Some(senders) = self.subscribers.get_mut(path) {
            // Closed receivers are dropped subscriptions
            senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
        }
    }
}

/// Document store kept in process memory
#[derive(Clone, Default)]
pub struct InMemorySignalingStore {
    state: Arc<RwLock<StoreState>>,
    offline: Arc<AtomicBool>,
}

impl InMemorySignalingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a raw document in place, bypassing server timestamps
    pub async fn seed(&self, path: &DocumentPath, document: Document) {
        let mut state = self.state.write().await;
        let fields = document.keys().cloned().collect();
        state.documents.insert(path.clone(), document);
        state.commit(path, StoreOpKind::Write, fields);
    }

    /// Simulate losing the connection to the store
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every committed mutation, oldest first
    pub async fn operations(&self) -> Vec<StoreOp> {
        self.state.read().await.log.clone()
    }

    pub async fn document_count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    pub async fn subscriber_count(&self, path: &DocumentPath) -> usize {
        let state = self.state.read().await;
        state
            .subscribers
            .get(path)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }
}

fn field_names(document: &Document) -> Vec<String> {
    document.keys().cloned().collect()
}

#[async_trait]
impl SignalingStore for InMemorySignalingStore {
    async fn write(&self, path: &DocumentPath, fields: Fields, merge: bool) -> StoreResult<()> {
        self.ensure_online()?;
        let values = fields.resolve(Utc::now());
        let names = field_names(&values);

        let mut state = self.state.write().await;
        let kind = if merge {
            state
                .documents
                .entry(path.clone())
                .or_default()
                .extend(values);
            StoreOpKind::Merge
        } else {
            state.documents.insert(path.clone(), values);
            StoreOpKind::Write
        };
        state.commit(path, kind, names);

        debug!(path = %path, merge, "Document written");
        Ok(())
    }

    async fn create(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()> {
        self.ensure_online()?;
        let values = fields.resolve(Utc::now());
        let names = field_names(&values);

        let mut state = self.state.write().await;
        if state.documents.contains_key(path) {
            warn!(path = %path, "Create rejected, document exists");
            return Err(StoreError::AlreadyExists(path.clone()));
        }
        state.documents.insert(path.clone(), values);
        state.commit(path, StoreOpKind::Create, names);

        debug!(path = %path, "Document created");
        Ok(())
    }

    async fn update(
        &self,
        path: &DocumentPath,
        fields: Fields,
        precondition: Precondition,
    ) -> StoreResult<()> {
        self.ensure_online()?;
        let values = fields.resolve(Utc::now());
        let names = field_names(&values);

        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;

        if !precondition.holds(document) {
            warn!(path = %path, ?precondition, "Update rejected by precondition");
            return Err(StoreError::PreconditionFailed(path.clone()));
        }

        document.extend(values);
        state.commit(path, StoreOpKind::Update, names);

        debug!(path = %path, "Document updated");
        Ok(())
    }

    async fn read(&self, path: &DocumentPath) -> StoreResult<Option<Document>> {
        self.ensure_online()?;
        Ok(self.state.read().await.documents.get(path).cloned())
    }

    async fn subscribe(&self, path: &DocumentPath) -> StoreResult<Subscription> {
        self.ensure_online()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.state.write().await;
        let current = Snapshot {
            path: path.clone(),
            data: state.documents.get(path).cloned(),
        };
        // Receiver is alive, first send cannot fail
        let _ = tx.send(current);
        state.subscribers.entry(path.clone()).or_default().push(tx);

        debug!(path = %path, "Subscribed");
        Ok(Subscription::new(path.clone(), rx))
    }

    async fn delete(&self, path: &DocumentPath) -> StoreResult<()> {
        self.ensure_online()?;

        let mut state = self.state.write().await;
        if state.documents.remove(path).is_some() {
            state.commit(path, StoreOpKind::Delete, Vec::new());
            debug!(path = %path, "Document deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path() -> DocumentPath {
        DocumentPath::new("chats/c1/call/current")
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let store = InMemorySignalingStore::new();
        store
            .write(&path(), Fields::new().set("status", "ringing"), false)
            .await
            .unwrap();

        let doc = store.read(&path()).await.unwrap().unwrap();
        assert_eq!(doc.get("status"), Some(&json!("ringing")));
        assert_eq!(store.document_count().await, 1);
    }

    #[tokio::test]
    async fn test_merge_keeps_existing_fields() {
        let store = InMemorySignalingStore::new();
        store
            .write(&path(), Fields::new().set("offer", "O1"), false)
            .await
            .unwrap();
        store
            .write(&path(), Fields::new().set("status", "ringing"), true)
            .await
            .unwrap();

        let doc = store.read(&path()).await.unwrap().unwrap();
        assert_eq!(doc.get("offer"), Some(&json!("O1")));
        assert_eq!(doc.get("status"), Some(&json!("ringing")));
    }

    #[tokio::test]
    async fn test_create_never_replaces_existing_document() {
        let store = InMemorySignalingStore::new();
        store
            .create(&path(), Fields::new().set("offer", "O1"))
            .await
            .unwrap();

        let err = store
            .create(&path(), Fields::new().set("offer", "O2"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists(path()));

        let doc = store.read(&path()).await.unwrap().unwrap();
        assert_eq!(doc.get("offer"), Some(&json!("O1")));
        let kinds: Vec<_> = store.operations().await.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![StoreOpKind::Create]);
    }

    #[tokio::test]
    async fn test_update_requires_document_and_precondition() {
        let store = InMemorySignalingStore::new();
        let err = store
            .update(&path(), Fields::new().set("a", 1), Precondition::Exists)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.document_count().await, 0);

        store
            .write(&path(), Fields::new().set("status", "cancelled"), false)
            .await
            .unwrap();
        let err = store
            .update(
                &path(),
                Fields::new().set("answer", "A1"),
                Precondition::field_equals("status", "ringing"),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::PreconditionFailed(path()));

        let doc = store.read(&path()).await.unwrap().unwrap();
        assert!(doc.get("answer").is_none());
    }

    #[tokio::test]
    async fn test_subscribe_delivers_current_then_changes() {
        let store = InMemorySignalingStore::new();
        let mut sub = store.subscribe(&path()).await.unwrap();

        assert_eq!(sub.next().await.unwrap().data, None);

        store
            .write(&path(), Fields::new().set("status", "ringing"), false)
            .await
            .unwrap();
        assert!(sub.next().await.unwrap().exists());

        store.delete(&path()).await.unwrap();
        assert!(!sub.next().await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemorySignalingStore::new();
        store.delete(&path()).await.unwrap();
        store.delete(&path()).await.unwrap();
        assert!(store.operations().await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let store = InMemorySignalingStore::new();
        let sub = store.subscribe(&path()).await.unwrap();
        assert_eq!(store.subscriber_count(&path()).await, 1);

        sub.unsubscribe();
        store
            .write(&path(), Fields::new().set("status", "ringing"), false)
            .await
            .unwrap();
        assert_eq!(store.subscriber_count(&path()).await, 0);
    }

    #[tokio::test]
    async fn test_offline_store_rejects_operations() {
        let store = InMemorySignalingStore::new();
        store.set_offline(true);

        let err = store
            .write(&path(), Fields::new().set("status", "ringing"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_offline(false);
        assert!(store.read(&path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_timestamps_are_resolved() {
        let store = InMemorySignalingStore::new();
        store
            .write(&path(), Fields::new().server_timestamp("timestamp"), false)
            .await
            .unwrap();

        let doc = store.read(&path()).await.unwrap().unwrap();
        assert!(doc.get("timestamp").and_then(|v| v.as_str()).is_some());
    }
}
