use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::branch::{ActivationCondition, Branch};
use crate::errors::SuggestionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationOperation {
    Create,
    Update,
}

impl MutationOperation {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Create => "create_branch",
            Self::Update => "update_branch",
        }
    }
}

/// A proposed graph change awaiting operator review. Nothing in the live graph
/// moves until an applier commit consumes it.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingMutation {
    pub id: Uuid,
    pub operation: MutationOperation,
    pub branch: Branch,
    pub activation_conditions: Vec<ActivationCondition>,
    pub created_at: DateTime<Utc>,
}

impl PendingMutation {
    pub fn new(
        operation: MutationOperation,
        branch: Branch,
        activation_conditions: Vec<ActivationCondition>,
    ) -> Self {
        Self { id: Uuid::new_v4(), operation, branch, activation_conditions, created_at: Utc::now() }
    }
}

/// Where queued mutations go. The file-backed log implements this; tests use
/// the in-memory variant.
pub trait SuggestionSink: Send + Sync {
    fn enqueue(&self, mutation: PendingMutation) -> Result<(), SuggestionError>;
    fn pending(&self) -> Result<Vec<PendingMutation>, SuggestionError>;
    /// Remove the given mutations after a successful commit (or an explicit
    /// operator clear).
    fn drain(&self, ids: &[Uuid]) -> Result<(), SuggestionError>;
}

/// In-memory sink for tests and simulation runs.
#[derive(Clone, Debug, Default)]
pub struct InMemorySink {
    queue: std::sync::Arc<std::sync::Mutex<Vec<PendingMutation>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SuggestionSink for InMemorySink {
    fn enqueue(&self, mutation: PendingMutation) -> Result<(), SuggestionError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| SuggestionError::Log("suggestion queue poisoned".to_owned()))?;
        queue.push(mutation);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<PendingMutation>, SuggestionError> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| SuggestionError::Log("suggestion queue poisoned".to_owned()))?;
        Ok(queue.clone())
    }

    fn drain(&self, ids: &[Uuid]) -> Result<(), SuggestionError> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| SuggestionError::Log("suggestion queue poisoned".to_owned()))?;
        queue.retain(|mutation| !ids.contains(&mutation.id));
        Ok(())
    }
}
