//! Shared value objects used across multiple bounded contexts

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Chat identifier, as assigned by the document store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Authenticated user identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(uid: &str) -> Self {
        Self::new(uid)
    }
}

/// Local call session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let chat = ChatId::new("c1");
        let uid = UserId::from("u1");

        assert_eq!(serde_json::to_string(&chat).unwrap(), "\"c1\"");
        assert_eq!(serde_json::to_string(&uid).unwrap(), "\"u1\"");

        let parsed: UserId = serde_json::from_str("\"u2\"").unwrap();
        assert_eq!(parsed.as_str(), "u2");
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
