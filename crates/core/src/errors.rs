use std::time::Duration;

use thiserror::Error;

/// Structural failures in the dialogue graph. These always reject the whole
/// mutation batch; a partially-linked graph is never observable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("branch `{branch}` response `{category}` points to missing branch `{target}`")]
    DanglingNext { branch: String, category: String, target: String },
    #[error("interruption `{pattern}` lists unknown stage `{stage}`")]
    DanglingInterruptibleStage { pattern: String, stage: String },
    #[error("activation condition on `{branch}` references missing branch `{previous}`")]
    DanglingActivation { branch: String, previous: String },
    #[error("branch `{0}` already exists")]
    DuplicateBranch(String),
    #[error("branch `{0}` does not exist")]
    UnknownBranch(String),
    #[error("entry branch `{0}` is not defined")]
    MissingEntry(String),
}

/// Turn-level failures. Classification degradations never surface here; they
/// fold into an unmatched result instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("conversation state references missing branch `{branch}`")]
    StateCorruption { branch: String },
    #[error("conversation has already ended")]
    ConversationOver,
}

impl TurnError {
    /// What the customer hears when the turn cannot proceed. Operators get the
    /// full error; customers get an apology.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::StateCorruption { .. } => {
                "I'm sorry, something went wrong on our side. We will call you back shortly."
            }
            Self::ConversationOver => "Thank you for your time. Goodbye.",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("semantic classification timed out after {0:?}")]
    Timeout(Duration),
    #[error("semantic classification failed: {0}")]
    Service(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("branch drafting timed out after {0:?}")]
    Timeout(Duration),
    #[error("branch drafting failed: {0}")]
    Service(String),
    #[error("draft `{name}` is malformed: {reason}")]
    Malformed { name: String, reason: String },
    #[error("draft `{name}` targets missing branch `{target}`")]
    DanglingTarget { name: String, target: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SuggestionError {
    #[error("suggestion log failure: {0}")]
    Log(String),
}
