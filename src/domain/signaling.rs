//! Signaling store port
//!
//! The call protocol runs over a durable document store with real-time change
//! notification. This module defines the contract the call core consumes; the
//! adapters live in the infrastructure layer.

use crate::domain::shared::value_objects::ChatId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;

/// Raw document body as stored
pub type Document = Map<String, Value>;

/// Store result type
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(DocumentPath),

    #[error("Precondition failed on {0}")]
    PreconditionFailed(DocumentPath),

    #[error("Document already exists: {0}")]
    AlreadyExists(DocumentPath),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Slash separated document path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// `chats/{chatId}`
    pub fn chat(chat_id: &ChatId) -> Self {
        Self(format!("chats/{}", chat_id))
    }

    /// `chats/{chatId}/call/current`
    pub fn current_call(chat_id: &ChatId) -> Self {
        Self(format!("chats/{}/call/current", chat_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields for a write, with optional server-assigned timestamps
#[derive(Debug, Clone, Default)]
pub struct Fields {
    values: Document,
    server_timestamps: Vec<String>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Ask the store to stamp `key` with its own clock
    pub fn server_timestamp(mut self, key: &str) -> Self {
        self.server_timestamps.push(key.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn has_server_timestamp(&self, key: &str) -> bool {
        self.server_timestamps.iter().any(|k| k == key)
    }

    /// Materialize the fields using the store clock
    pub fn resolve(self, now: DateTime<Utc>) -> Document {
        let mut values = self.values;
        for key in self.server_timestamps {
            values.insert(key, Value::String(now.to_rfc3339()));
        }
        values
    }
}

/// Condition checked atomically before an update is applied
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The document must exist
    Exists,
    /// The document must exist and `field` must equal `value`
    FieldEquals { field: String, value: Value },
}

impl Precondition {
    pub fn field_equals(field: &str, value: impl Into<Value>) -> Self {
        Precondition::FieldEquals {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn holds(&self, document: &Document) -> bool {
        match self {
            Precondition::Exists => true,
            Precondition::FieldEquals { field, value } => document.get(field) == Some(value),
        }
    }
}

/// Full state of a document at one point in time
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: DocumentPath,
    pub data: Option<Document>,
}

impl Snapshot {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// Live change feed for one document; dropping it unsubscribes
pub struct Subscription {
    path: DocumentPath,
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    pub fn new(path: DocumentPath, rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { path, rx }
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// Next snapshot, or `None` once the store side has gone away
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.rx.close();
    }
}

impl Stream for Subscription {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Snapshot>> {
        self.rx.poll_recv(cx)
    }
}

/// Document store used as the signaling channel
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Create or replace a document, or merge into it when `merge` is set
    async fn write(&self, path: &DocumentPath, fields: Fields, merge: bool) -> StoreResult<()>;

    /// Create a document; fails with `AlreadyExists` if one is already there
    async fn create(&self, path: &DocumentPath, fields: Fields) -> StoreResult<()>;

    /// Merge into an existing document if `precondition` holds
    async fn update(
        &self,
        path: &DocumentPath,
        fields: Fields,
        precondition: Precondition,
    ) -> StoreResult<()>;

    async fn read(&self, path: &DocumentPath) -> StoreResult<Option<Document>>;

    /// Subscribe to a document; the current state is delivered first
    async fn subscribe(&self, path: &DocumentPath) -> StoreResult<Subscription>;

    /// Delete a document; deleting a missing document succeeds
    async fn delete(&self, path: &DocumentPath) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_paths() {
        let chat = ChatId::new("c1");
        assert_eq!(DocumentPath::chat(&chat).as_str(), "chats/c1");
        assert_eq!(DocumentPath::current_call(&chat).as_str(), "chats/c1/call/current");
    }

    #[test]
    fn test_fields_resolve_server_timestamps() {
        let now = Utc::now();
        let doc = Fields::new()
            .set("status", "ringing")
            .server_timestamp("timestamp")
            .resolve(now);

        assert_eq!(doc.get("status"), Some(&json!("ringing")));
        assert_eq!(doc.get("timestamp"), Some(&json!(now.to_rfc3339())));
    }

    #[test]
    fn test_precondition_field_equals() {
        let mut doc = Document::new();
        doc.insert("status".to_string(), json!("ringing"));

        assert!(Precondition::Exists.holds(&doc));
        assert!(Precondition::field_equals("status", "ringing").holds(&doc));
        assert!(!Precondition::field_equals("status", "answered").holds(&doc));
        assert!(!Precondition::field_equals("answer", "A1").holds(&doc));
    }
}
