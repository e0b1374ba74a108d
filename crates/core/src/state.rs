use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded conversation turn. Entries are immutable once appended.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub branch: String,
    pub utterance: String,
    pub category: String,
    pub at: DateTime<Utc>,
}

/// A suspended main-flow position while an interruption is being resolved.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Suspension {
    pub suspended_branch: String,
    pub pattern: String,
}

/// Per-conversation state. One utterance is fully processed before the next is
/// accepted; conversations never share this struct.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConversationState {
    current_branch: String,
    history: Vec<HistoryEntry>,
    interruption_stack: Vec<Suspension>,
    pub context: BTreeMap<String, String>,
    last_reply: Option<String>,
    ended: bool,
}

impl ConversationState {
    pub fn new(entry_branch: impl Into<String>, context: BTreeMap<String, String>) -> Self {
        Self {
            current_branch: entry_branch.into(),
            history: Vec::new(),
            interruption_stack: Vec::new(),
            context,
            last_reply: None,
            ended: false,
        }
    }

    pub fn current_branch(&self) -> &str {
        &self.current_branch
    }

    pub(crate) fn set_branch(&mut self, branch: impl Into<String>) {
        self.current_branch = branch.into();
    }

    /// Append-only: history entries are never mutated or removed.
    pub(crate) fn record(&mut self, branch: &str, utterance: &str, category: impl Into<String>) {
        self.history.push(HistoryEntry {
            branch: branch.to_owned(),
            utterance: utterance.to_owned(),
            category: category.into(),
            at: Utc::now(),
        });
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub(crate) fn push_suspension(&mut self, suspended_branch: &str, pattern: &str) {
        self.interruption_stack.push(Suspension {
            suspended_branch: suspended_branch.to_owned(),
            pattern: pattern.to_owned(),
        });
    }

    /// Pops the most recent suspension and restores the exact branch it
    /// recorded. Returns the suspension for the caller to inspect.
    pub(crate) fn pop_suspension(&mut self) -> Option<Suspension> {
        let suspension = self.interruption_stack.pop()?;
        self.current_branch = suspension.suspended_branch.clone();
        Some(suspension)
    }

    pub fn interruption_depth(&self) -> usize {
        self.interruption_stack.len()
    }

    pub fn active_interruption(&self) -> Option<&Suspension> {
        self.interruption_stack.last()
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.last_reply.as_deref()
    }

    pub(crate) fn set_last_reply(&mut self, reply: &str) {
        self.last_reply = Some(reply.to_owned());
    }

    pub(crate) fn end(&mut self) {
        self.ended = true;
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}
