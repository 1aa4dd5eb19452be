//! Call domain service

use crate::domain::shared::error::DomainError;
use crate::domain::shared::error::Result;
use crate::domain::shared::value_objects::UserId;
use crate::domain::signaling::Document;
use serde_json::Value;

pub const FIELD_PARTICIPANTS: &str = "participants";

/// Rules that involve more than one call document
pub struct CallDomainService;

impl CallDomainService {
    /// Validate call setup
    pub fn validate_call_setup(caller: &UserId, callee: &UserId) -> Result<()> {
        if caller == callee {
            return Err(DomainError::ValidationError(
                "Cannot call yourself".to_string(),
            ));
        }

        Ok(())
    }

    /// Check `uid` against the chat document's participant list
    pub fn check_participant(chat: Option<&Document>, uid: &UserId) -> Result<()> {
        let chat = chat.ok_or_else(|| DomainError::Unauthorized("Chat not found".to_string()))?;

        let participants = match chat.get(FIELD_PARTICIPANTS) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(DomainError::Unauthorized(
                    "Participants field is not an array".to_string(),
                ))
            }
            None => {
                return Err(DomainError::Unauthorized(
                    "Participants field missing".to_string(),
                ))
            }
        };

        let is_participant = participants.iter().any(|p| match p {
            Value::String(s) => s == uid.as_str(),
            other => other.to_string() == uid.as_str(),
        });

        if is_participant {
            Ok(())
        } else {
            Err(DomainError::Unauthorized(format!(
                "User {} is not a participant of this chat",
                uid
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(participants: Value) -> Document {
        let mut doc = Document::new();
        doc.insert(FIELD_PARTICIPANTS.to_string(), participants);
        doc
    }

    #[test]
    fn test_validate_call_setup() {
        let uid = UserId::new("u1");
        assert!(CallDomainService::validate_call_setup(&uid, &uid).is_err());
        assert!(CallDomainService::validate_call_setup(&uid, &"u2".into()).is_ok());
    }

    #[test]
    fn test_participant_check() {
        let doc = chat(json!(["u1", "u2"]));

        assert!(CallDomainService::check_participant(Some(&doc), &"u1".into()).is_ok());
        let err = CallDomainService::check_participant(Some(&doc), &"u3".into()).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn test_numeric_participant_ids_compare_as_strings() {
        let doc = chat(json!([42, "u2"]));
        assert!(CallDomainService::check_participant(Some(&doc), &"42".into()).is_ok());
    }

    #[test]
    fn test_missing_chat_or_field() {
        assert!(CallDomainService::check_participant(None, &"u1".into()).is_err());
        assert!(CallDomainService::check_participant(Some(&Document::new()), &"u1".into()).is_err());
        let doc = chat(json!("u1"));
        assert!(CallDomainService::check_participant(Some(&doc), &"u1".into()).is_err());
    }
}
