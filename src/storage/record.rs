//! Chat log record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::common::errors::{ChatLogError, ChatLogResult};

/// One exchanged turn. The structure is opaque to this crate.
pub type Message = Map<String, Value>;

/// A stored conversation log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLogRecord {
    /// Primary key for the multi-turn conversation.
    pub conversation_id: String,
    /// Owning user.
    pub user_id: String,
    /// Model that produced the response.
    pub model: String,
    /// Exchanged turns, in order.
    pub messages: Vec<Message>,
    /// Latest generated response.
    pub response: Option<String>,
    /// Creation time in epoch seconds.
    pub created_at: i64,
    /// Last update time in epoch seconds.
    pub updated_at: i64,
}

/// Caller-supplied fields for creating or overwriting a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    /// Conversation id (never generated by the store).
    pub conversation_id: String,
    /// Owning user.
    pub user_id: String,
    /// Model identifier.
    pub model: String,
    /// Exchanged turns.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Generated response text.
    #[serde(default)]
    pub response: Option<String>,
}

impl ChatLogEntry {
    /// Start an entry with no messages and no response.
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            model: model.into(),
            messages: Vec::new(),
            response: None,
        }
    }

    /// Set the message list.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Set the response text.
    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Reject entries with blank identifiers.
    ///
    /// # Errors
    /// Returns `InvalidRecord` naming the first blank field.
    pub fn validate(&self) -> ChatLogResult<()> {
        for (field, value) in [
            ("conversation_id", &self.conversation_id),
            ("user_id", &self.user_id),
            ("model", &self.model),
        ] {
            if value.trim().is_empty() {
                return Err(ChatLogError::InvalidRecord(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }

    /// Materialize a fresh record stamped at `now`.
    #[must_use]
    pub fn into_record(self, now: i64) -> ChatLogRecord {
        ChatLogRecord {
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            model: self.model,
            messages: self.messages,
            response: self.response,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Offset pagination plus an optional model narrowing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageQuery {
    /// Rows to skip.
    pub skip: u32,
    /// Maximum rows to return.
    pub limit: u32,
    /// Only return records produced by this model.
    pub model: Option<String>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 50,
            model: None,
        }
    }
}

impl PageQuery {
    /// Build a page without a model filter.
    #[must_use]
    pub const fn new(skip: u32, limit: u32) -> Self {
        Self {
            skip,
            limit,
            model: None,
        }
    }

    /// Restrict the page to one model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_blank_ids_are_rejected() {
        let entry = ChatLogEntry::new(" ", "u1", "gpt");
        let err = entry.validate().unwrap_err();
        assert!(err.to_string().contains("conversation_id"));

        assert!(ChatLogEntry::new("c", "", "gpt").validate().is_err());
        assert!(ChatLogEntry::new("c", "u1", "gpt").validate().is_ok());
    }

    #[test]
    fn test_entry_deserializes_with_defaults() {
        let entry: ChatLogEntry = serde_json::from_value(json!({
            "conversation_id": "c1",
            "user_id": "u1",
            "model": "llama"
        }))
        .unwrap();
        assert!(entry.messages.is_empty());
        assert_eq!(entry.response, None);
    }

    #[test]
    fn test_into_record_sets_equal_timestamps() {
        let record = ChatLogEntry::new("c1", "u1", "llama")
            .with_response("hello")
            .into_record(1_000);
        assert_eq!(record.created_at, 1_000);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.response.as_deref(), Some("hello"));
    }
}
