use tracing::{debug, error, warn};

use crate::branch::Branch;
use crate::classify::{Classification, Classifier, SemanticClassifier};
use crate::errors::TurnError;
use crate::graph::BranchGraph;
use crate::interrupt::{
    ActionHandler, ActionResolution, FollowUpAction, InterruptionPattern,
};
use crate::render::render;
use crate::state::ConversationState;
use crate::suggestions::{SuggestionGenerator, UNEXPECTED_RESPONSE};

/// What the bot says when an utterance matches nothing and no learned branch
/// covers it yet.
pub const CLARIFICATION_LINE: &str =
    "I understand. Let me help you with this. Can you please clarify what you mean?";

/// The result of processing one utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: Option<String>,
    pub category: String,
    pub branch: String,
    pub ended: bool,
}

/// Drives one conversation turn at a time: overlay first, then classification,
/// then the unmatched path. Strictly sequential per conversation; the state is
/// only touched through `&mut`.
pub struct FlowController {
    classifier: Classifier,
    actions: Box<dyn ActionHandler>,
}

impl FlowController {
    pub fn new(classifier: Classifier, actions: Box<dyn ActionHandler>) -> Self {
        Self { classifier, actions }
    }

    /// Process a single utterance. The graph snapshot is pinned for the whole
    /// turn; a commit landing mid-turn is only visible to the next one.
    pub async fn take_turn(
        &self,
        graph: &BranchGraph,
        state: &mut ConversationState,
        utterance: &str,
        semantic: &dyn SemanticClassifier,
        generator: Option<&SuggestionGenerator>,
    ) -> Result<TurnOutcome, TurnError> {
        if state.is_ended() {
            return Err(TurnError::ConversationOver);
        }

        // An active interruption owns the utterance until it resolves.
        if let Some(suspension) = state.active_interruption() {
            let pattern_name = suspension.pattern.clone();
            if let Some(pattern) = graph.overlay().pattern(&pattern_name) {
                if let Some(outcome) = self.resolve_follow_up(graph, state, utterance, pattern)? {
                    return Ok(outcome);
                }
                // No follow-up rule claimed the utterance: fall back to the
                // main flow and process it normally.
                state.pop_suspension();
            } else {
                // The pattern vanished in a commit; drop the suspension.
                warn!(pattern = %pattern_name, "active interruption no longer defined");
                state.pop_suspension();
            }
        }

        if let Some(pattern) = graph.overlay().check(utterance, state.current_branch()) {
            return self.handle_interruption(graph, state, utterance, pattern);
        }

        let Some(branch) = graph.get(state.current_branch()).cloned() else {
            let corrupted = state.current_branch().to_owned();
            error!(branch = %corrupted, "conversation state references a missing branch");
            state.end();
            return Err(TurnError::StateCorruption { branch: corrupted });
        };

        match self.classifier.classify(&branch, utterance, semantic).await {
            Classification::Matched { category, .. } => {
                Ok(self.advance(graph, state, utterance, &branch, &category))
            }
            Classification::Unmatched => {
                Ok(self.handle_unmatched(graph, state, utterance, &branch, generator).await)
            }
        }
    }

    fn advance(
        &self,
        graph: &BranchGraph,
        state: &mut ConversationState,
        utterance: &str,
        branch: &Branch,
        category: &str,
    ) -> TurnOutcome {
        state.record(&branch.name, utterance, category);

        let rule = branch.expected_responses.get(category);
        let mut parts: Vec<String> = Vec::new();
        if let Some(template) = rule.and_then(|rule| rule.response_template.as_deref()) {
            parts.push(render(template, &state.context));
        }
        if let Some(next) = rule.and_then(|rule| rule.next.as_deref()) {
            debug!(from = %branch.name, to = %next, category, "transition");
            state.set_branch(next);
            if let Some(target) = graph.get(next) {
                parts.push(render(&target.bot_prompt, &state.context));
            }
            if graph.is_closure(next) {
                state.end();
            }
        }

        let reply = join_reply(parts);
        if let Some(reply) = &reply {
            state.set_last_reply(reply);
        }
        TurnOutcome {
            reply,
            category: category.to_owned(),
            branch: state.current_branch().to_owned(),
            ended: state.is_ended(),
        }
    }

    async fn handle_unmatched(
        &self,
        graph: &BranchGraph,
        state: &mut ConversationState,
        utterance: &str,
        branch: &Branch,
        generator: Option<&SuggestionGenerator>,
    ) -> TurnOutcome {
        state.record(&branch.name, utterance, UNEXPECTED_RESPONSE);

        // A learned branch activated by this exact situation takes over.
        if let Some(learned) = graph.activated_branch(&branch.name, UNEXPECTED_RESPONSE) {
            debug!(from = %branch.name, to = %learned.name, "activated learned branch");
            state.set_branch(&learned.name);
            let reply = render(&learned.bot_prompt, &state.context);
            if graph.is_closure(&learned.name) {
                state.end();
            }
            state.set_last_reply(&reply);
            return TurnOutcome {
                reply: Some(reply),
                category: UNEXPECTED_RESPONSE.to_owned(),
                branch: state.current_branch().to_owned(),
                ended: state.is_ended(),
            };
        }

        if let Some(generator) = generator {
            if let Err(degraded) = generator
                .propose(graph, branch, utterance, &state.context)
                .await
            {
                warn!(branch = %branch.name, error = %degraded, "branch suggestion failed");
            }
        }

        state.set_last_reply(CLARIFICATION_LINE);
        TurnOutcome {
            reply: Some(CLARIFICATION_LINE.to_owned()),
            category: UNEXPECTED_RESPONSE.to_owned(),
            branch: state.current_branch().to_owned(),
            ended: false,
        }
    }

    fn handle_interruption(
        &self,
        graph: &BranchGraph,
        state: &mut ConversationState,
        utterance: &str,
        pattern: &InterruptionPattern,
    ) -> Result<TurnOutcome, TurnError> {
        let category = format!("interruption:{}", pattern.action.key());
        let suspended = state.current_branch().to_owned();
        state.record(&suspended, utterance, category.clone());
        state.push_suspension(&suspended, &pattern.name);

        let outcome = self.actions.execute(pattern, utterance, state);
        let mut parts: Vec<String> = Vec::new();
        if let Some(reply) = outcome.reply {
            parts.push(reply);
        } else if let Some(template) = &pattern.response_template {
            parts.push(render(template, &state.context));
        }

        match outcome.resolution {
            ActionResolution::Resolved => {
                // Same-turn resolution restores the exact suspended branch.
                state.pop_suspension();
            }
            ActionResolution::AwaitFollowUp => {}
            ActionResolution::Jump(stage) => {
                state.pop_suspension();
                if graph.get(&stage).is_none() {
                    let corrupted = stage.clone();
                    error!(branch = %corrupted, "interruption jump targets a missing branch");
                    state.end();
                    return Err(TurnError::StateCorruption { branch: corrupted });
                }
                state.set_branch(&stage);
                if parts.is_empty() {
                    if let Some(target) = graph.get(&stage) {
                        parts.push(render(&target.bot_prompt, &state.context));
                    }
                }
                if graph.is_closure(&stage) {
                    state.end();
                }
            }
            ActionResolution::EndConversation => {
                state.pop_suspension();
                state.end();
            }
        }

        let reply = join_reply(parts);
        if let Some(reply) = &reply {
            state.set_last_reply(reply);
        }
        Ok(TurnOutcome {
            reply,
            category,
            branch: state.current_branch().to_owned(),
            ended: state.is_ended(),
        })
    }

    /// Returns `Ok(None)` when no follow-up rule claims the utterance; the
    /// caller pops the suspension and reprocesses it in the main flow.
    fn resolve_follow_up(
        &self,
        graph: &BranchGraph,
        state: &mut ConversationState,
        utterance: &str,
        pattern: &InterruptionPattern,
    ) -> Result<Option<TurnOutcome>, TurnError> {
        let Some(rule) = graph.overlay().resolve_follow_up(pattern, utterance) else {
            return Ok(None);
        };
        let category = format!("interruption:{}", rule.category);
        let current = state.current_branch().to_owned();
        state.record(&current, utterance, category.clone());

        if rule.category == "provides_time" {
            state
                .context
                .insert("callback_time".to_owned(), utterance.trim().to_owned());
        }

        let mut parts: Vec<String> = Vec::new();
        if let Some(template) = &rule.response_template {
            parts.push(render(template, &state.context));
        }

        match &rule.action {
            FollowUpAction::ReturnToMainFlow => {
                state.pop_suspension();
                if let Some(restored) = graph.get(state.current_branch()) {
                    parts.push(render(&restored.bot_prompt, &state.context));
                }
            }
            FollowUpAction::EndConversation => {
                state.pop_suspension();
                state.end();
            }
            FollowUpAction::Advance(stage) => {
                state.pop_suspension();
                if graph.get(stage).is_none() {
                    let corrupted = stage.clone();
                    error!(branch = %corrupted, "follow-up advance targets a missing branch");
                    state.end();
                    return Err(TurnError::StateCorruption { branch: corrupted });
                }
                state.set_branch(stage);
                if parts.is_empty() {
                    if let Some(target) = graph.get(stage) {
                        parts.push(render(&target.bot_prompt, &state.context));
                    }
                }
                if graph.is_closure(stage) {
                    state.end();
                }
            }
        }

        let reply = join_reply(parts);
        if let Some(reply) = &reply {
            state.set_last_reply(reply);
        }
        Ok(Some(TurnOutcome {
            reply,
            category,
            branch: state.current_branch().to_owned(),
            ended: state.is_ended(),
        }))
    }
}

fn join_reply(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}
