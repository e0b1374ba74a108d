use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use branchline_core::{
    ActivationCondition, Branch, MutationOperation, PendingMutation, SuggestionError,
    SuggestionSink,
};

use crate::store::temp_sibling;

/// Append-only file of pending mutations. Entries survive process restarts and
/// are only removed by an applier commit or an explicit operator clear.
#[derive(Clone, Debug)]
pub struct SuggestionLog {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct LogFile {
    #[serde(default)]
    pending_operations: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct LogEntry {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    operation_type: String,
    timestamp: DateTime<Utc>,
    data: LogData,
}

#[derive(Debug, Deserialize, Serialize)]
struct LogData {
    branch_name: String,
    branch_data: Branch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    called_when: Vec<ActivationCondition>,
}

impl SuggestionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<LogFile, SuggestionError> {
        if !self.path.exists() {
            return Ok(LogFile::default());
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|error| SuggestionError::Log(format!("read {}: {error}", self.path.display())))?;
        if raw.trim().is_empty() {
            return Ok(LogFile::default());
        }
        serde_json::from_str(&raw)
            .map_err(|error| SuggestionError::Log(format!("parse {}: {error}", self.path.display())))
    }

    fn write(&self, mut file: LogFile) -> Result<(), SuggestionError> {
        file.timestamp = Some(Utc::now());
        let rendered = serde_json::to_string_pretty(&file)
            .map_err(|error| SuggestionError::Log(error.to_string()))?;
        let tmp = temp_sibling(&self.path);
        fs::write(&tmp, rendered)
            .map_err(|error| SuggestionError::Log(format!("write {}: {error}", tmp.display())))?;
        fs::rename(&tmp, &self.path).map_err(|error| {
            SuggestionError::Log(format!("rename {}: {error}", self.path.display()))
        })?;
        Ok(())
    }

    /// Drop every entry without applying anything.
    pub fn clear(&self) -> Result<(), SuggestionError> {
        self.write(LogFile::default())
    }
}

impl SuggestionSink for SuggestionLog {
    fn enqueue(&self, mutation: PendingMutation) -> Result<(), SuggestionError> {
        let mut file = self.read()?;
        file.pending_operations.push(entry_from(mutation));
        let total = file.pending_operations.len();
        self.write(file)?;
        debug!(path = %self.path.display(), total, "suggestion appended");
        Ok(())
    }

    fn pending(&self) -> Result<Vec<PendingMutation>, SuggestionError> {
        let file = self.read()?;
        file.pending_operations.into_iter().map(mutation_from).collect()
    }

    fn drain(&self, ids: &[Uuid]) -> Result<(), SuggestionError> {
        let mut file = self.read()?;
        file.pending_operations.retain(|entry| !ids.contains(&entry.id));
        self.write(file)
    }
}

fn entry_from(mutation: PendingMutation) -> LogEntry {
    LogEntry {
        id: mutation.id,
        operation_type: mutation.operation.key().to_owned(),
        timestamp: mutation.created_at,
        data: LogData {
            branch_name: mutation.branch.name.clone(),
            branch_data: mutation.branch,
            called_when: mutation.activation_conditions,
        },
    }
}

fn mutation_from(entry: LogEntry) -> Result<PendingMutation, SuggestionError> {
    let operation = match entry.operation_type.as_str() {
        "create_branch" => MutationOperation::Create,
        "update_branch" => MutationOperation::Update,
        other => {
            return Err(SuggestionError::Log(format!("unknown operation_type `{other}`")));
        }
    };
    let mut branch = entry.data.branch_data;
    branch.name = entry.data.branch_name;
    Ok(PendingMutation {
        id: entry.id,
        operation,
        branch,
        activation_conditions: entry.data.called_when,
        created_at: entry.timestamp,
    })
}
