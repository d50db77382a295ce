//! In-memory conversation history.
//!
//! The original system persists conversations in Postgres alongside the
//! recall corpus; that collaborator is out of scope here (see
//! `SPEC_FULL.md`). This is the "thin stand-in" the spec calls for: just
//! enough to let `GET`/`DELETE /api/chat/history/{id}` work against a
//! real chat turn. History does not survive a process restart.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    pub created_at_ms: i64,
}

#[derive(Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Vec<ConversationMessage>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, conversation_id: &str, message: ConversationMessage) {
        let mut guard = self.conversations.lock().await;
        guard.entry(conversation_id.to_string()).or_default().push(message);
    }

    pub async fn history(&self, conversation_id: &str) -> Option<Vec<ConversationMessage>> {
        let guard = self.conversations.lock().await;
        guard.get(conversation_id).cloned()
    }

    /// Clears a conversation's history. Returns `true` if it existed.
    pub async fn clear(&self, conversation_id: &str) -> bool {
        let mut guard = self.conversations.lock().await;
        guard.remove(conversation_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_history_round_trips() {
        let store = ConversationStore::new();
        store
            .append("c1", ConversationMessage { role: "user".to_string(), content: "hi".to_string(), created_at_ms: 1 })
            .await;
        let history = store.history("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn history_is_none_for_unknown_conversation() {
        let store = ConversationStore::new();
        assert!(store.history("missing").await.is_none());
    }

    #[tokio::test]
    async fn clear_reports_whether_it_existed() {
        let store = ConversationStore::new();
        assert!(!store.clear("missing").await);
        store
            .append("c1", ConversationMessage { role: "user".to_string(), content: "hi".to_string(), created_at_ms: 1 })
            .await;
        assert!(store.clear("c1").await);
        assert!(store.history("c1").await.is_none());
    }
}
