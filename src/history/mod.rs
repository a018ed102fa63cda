//! Append-only conversation log.
//!
//! The agent loop is the single writer; readers get consistent snapshots.
//! Tool results are stored in their masked form only — the full output
//! stays with the immediate caller.

pub mod masking;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
    Tool,
}

/// One turn in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only conversation log, scoped to one session.
pub struct ConversationHistory {
    entries: Mutex<Vec<HistoryEntry>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append one entry.  There is no removal or mutation path.
    pub fn append(&self, role: HistoryRole, content: impl Into<String>) {
        let entry = HistoryEntry {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        };
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    /// Snapshot of the whole log.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The last `k` turns, oldest first, for LLM context assembly.
    pub fn last_turns(&self, k: usize) -> Vec<HistoryEntry> {
        let entries = self.snapshot();
        let start = entries.len().saturating_sub(k);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a fresh session log (`/clear`).  This replaces the log rather
    /// than mutating entries, preserving append-only semantics per session.
    pub fn clear(&self) {
        match self.entries.lock() {
            Ok(mut entries) => entries.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_snapshot() {
        let h = ConversationHistory::new();
        h.append(HistoryRole::User, "hello");
        h.append(HistoryRole::Assistant, "hi");
        let snap = h.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].role, HistoryRole::User);
        assert_eq!(snap[1].content, "hi");
    }

    #[test]
    fn last_turns_returns_tail_in_order() {
        let h = ConversationHistory::new();
        for i in 0..10 {
            h.append(HistoryRole::User, format!("msg {i}"));
        }
        let tail = h.last_turns(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].content, "msg 7");
        assert_eq!(tail[2].content, "msg 9");
    }

    #[test]
    fn last_turns_handles_short_history() {
        let h = ConversationHistory::new();
        h.append(HistoryRole::User, "only");
        assert_eq!(h.last_turns(5).len(), 1);
    }
}
