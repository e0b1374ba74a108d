use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::branch::{ActivationCondition, Branch, Keywords, ResponseRule, ResponseRules};
use crate::errors::DraftError;
use crate::graph::BranchGraph;

use super::types::{MutationOperation, PendingMutation, SuggestionSink};

/// The trigger category recorded for utterances nothing matched.
pub const UNEXPECTED_RESPONSE: &str = "unexpected_response";

/// Raw branch content produced by the drafting service, before validation and
/// activation stamping.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchDraft {
    pub name: String,
    pub intent: String,
    pub bot_prompt: String,
    pub expected_responses: ResponseRules,
}

/// Drafting boundary. Implementations own their transport and timeout.
#[async_trait]
pub trait BranchDrafter: Send + Sync {
    async fn draft(
        &self,
        previous: &Branch,
        utterance: &str,
        context: &BTreeMap<String, String>,
        known_branches: &[String],
    ) -> Result<BranchDraft, DraftError>;
}

/// Deterministic drafter used offline: proposes a `<stage>_handled` branch that
/// acknowledges the unexpected reply and re-asks the original question.
#[derive(Clone, Copy, Debug, Default)]
pub struct FallbackDrafter;

#[async_trait]
impl BranchDrafter for FallbackDrafter {
    async fn draft(
        &self,
        previous: &Branch,
        _utterance: &str,
        _context: &BTreeMap<String, String>,
        _known_branches: &[String],
    ) -> Result<BranchDraft, DraftError> {
        let name = format!("{}_handled", previous.name);
        Ok(BranchDraft {
            name: name.clone(),
            intent: format!("handle_unexpected_{}", previous.name),
            bot_prompt: format!(
                "I understand. Let me note that down. {}",
                previous.bot_prompt
            ),
            expected_responses: ResponseRules::new(vec![ResponseRule {
                category: "acknowledge".to_owned(),
                keywords: Keywords::CatchAll,
                next: Some(previous.name.clone()),
                response_template: None,
            }]),
        })
    }
}

/// Turns unmatched utterances into reviewed graph proposals. Never touches the
/// live graph itself.
pub struct SuggestionGenerator {
    drafter: Arc<dyn BranchDrafter>,
    sink: Arc<dyn SuggestionSink>,
}

impl SuggestionGenerator {
    pub fn new(drafter: Arc<dyn BranchDrafter>, sink: Arc<dyn SuggestionSink>) -> Self {
        Self { drafter, sink }
    }

    /// Ask the drafter for a new branch, validate its shape and edges, stamp
    /// the activation condition, and enqueue the mutation. Returns the queued
    /// mutation for logging; callers degrade to a warning on error.
    pub async fn propose(
        &self,
        graph: &BranchGraph,
        previous: &Branch,
        utterance: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<PendingMutation, DraftError> {
        let known: Vec<String> = graph.all().map(|branch| branch.name.clone()).collect();
        let draft = self.drafter.draft(previous, utterance, context, &known).await?;
        validate_draft(&draft, graph)?;

        let operation = if graph.get(&draft.name).is_some() {
            MutationOperation::Update
        } else {
            MutationOperation::Create
        };

        let branch = Branch {
            name: draft.name.clone(),
            intent: draft.intent,
            bot_prompt: draft.bot_prompt,
            expected_responses: draft.expected_responses,
            activation_conditions: Vec::new(),
            action: None,
        };
        let activation = ActivationCondition {
            previous_branch: previous.name.clone(),
            previous_category: UNEXPECTED_RESPONSE.to_owned(),
            trigger: utterance.trim().to_lowercase(),
        };

        let mutation = PendingMutation::new(operation, branch, vec![activation]);
        self.sink
            .enqueue(mutation.clone())
            .map_err(|error| DraftError::Service(error.to_string()))?;
        info!(branch = %mutation.branch.name, operation = mutation.operation.key(), "suggestion queued");
        Ok(mutation)
    }
}

fn validate_draft(draft: &BranchDraft, graph: &BranchGraph) -> Result<(), DraftError> {
    if draft.name.trim().is_empty() {
        return Err(DraftError::Malformed {
            name: draft.name.clone(),
            reason: "empty branch name".to_owned(),
        });
    }
    if draft.intent.trim().is_empty() || draft.bot_prompt.trim().is_empty() {
        return Err(DraftError::Malformed {
            name: draft.name.clone(),
            reason: "missing intent or bot_prompt".to_owned(),
        });
    }
    for rule in draft.expected_responses.iter() {
        if let Some(target) = &rule.next {
            // A draft may point back at itself or at any live branch.
            if target != &draft.name && graph.get(target).is_none() {
                debug!(draft = %draft.name, %target, "draft rejected for dangling edge");
                return Err(DraftError::DanglingTarget {
                    name: draft.name.clone(),
                    target: target.clone(),
                });
            }
        }
    }
    Ok(())
}
