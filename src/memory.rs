use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::actions::ActionOutcome;
use crate::agent::oracle::Decision;

const MEMORY_PREFIX: &str = "MEMORY_SAVE:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// The saved fact, if this message records one.
    pub fn memory_fact(&self) -> Option<&str> {
        if self.role != Role::Assistant {
            return None;
        }
        self.content
            .strip_prefix(MEMORY_PREFIX)
            .map(str::trim)
    }
}

/// One line of the recent-action window sent to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Action {
        #[serde(flatten)]
        decision: Decision,
        outcome: ActionOutcome,
    },
    Note(ChatMessage),
}

impl HistoryEntry {
    pub fn succeeded(decision: &Decision) -> Self {
        HistoryEntry::Action {
            decision: decision.clone(),
            outcome: ActionOutcome::Success,
        }
    }

    pub fn note(content: impl Into<String>) -> Self {
        HistoryEntry::Note(ChatMessage::system(content))
    }
}

/// The most recent actions and system notes; older entries are dropped, never summarised.
#[derive(Debug, Clone)]
pub struct ActionHistory {
    entries: VecDeque<HistoryEntry>,
    window: usize,
}

impl ActionHistory {
    pub fn new(window: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.window == 0 {
            return;
        }
        if self.entries.len() >= self.window {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Facts saved by the oracle during one run. Never pruned.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    messages: Vec<ChatMessage>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, fact: &str) {
        self.messages
            .push(ChatMessage::assistant(format!("{MEMORY_PREFIX} {fact}")));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn facts(&self) -> Vec<&str> {
        self.messages
            .iter()
            .filter_map(ChatMessage::memory_fact)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
