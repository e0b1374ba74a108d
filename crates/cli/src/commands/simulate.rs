use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use branchline_agent::{GeminiClient, LlmClient, LlmDrafter, SemanticEscalator};
use branchline_core::{
    AppConfig, BranchDrafter, Classifier, ConversationState, DefaultActionHandler,
    FallbackDrafter, FlowController, NoSemanticClassifier, SemanticClassifier,
    SuggestionGenerator, TurnError,
};
use branchline_core::render::render;
use branchline_store::{FlowStore, SuggestionLog};

use super::CommandResult;

/// Drive a conversation against the live graph from stdin. With an API key
/// configured, unmatched utterances escalate to the LLM and new branches are
/// drafted by it; without one, classification runs offline (keywords and
/// wildcards only) and suggestions fall back to the deterministic drafter.
pub fn run(config: &AppConfig, context_pairs: &[String]) -> CommandResult {
    let context = match parse_context(context_pairs) {
        Ok(context) => context,
        Err(message) => return CommandResult::failure("simulate", "context", message, 2),
    };

    let store = FlowStore::new(&config.flows.branches_path);
    let graph = match store.load() {
        Ok(graph) => graph,
        Err(error) => return CommandResult::failure("simulate", "graph", error.to_string(), 1),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure("simulate", "runtime", error.to_string(), 1),
    };

    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let (semantic, drafter): (Box<dyn SemanticClassifier>, Arc<dyn BranchDrafter>) =
        match llm_client(config) {
            Some(Ok(client)) => {
                info!(model = %config.llm.model, "semantic escalation enabled");
                let client: Arc<dyn LlmClient> = Arc::new(client);
                (
                    Box::new(SemanticEscalator::new(client.clone(), timeout)),
                    Arc::new(LlmDrafter::new(client, timeout)),
                )
            }
            Some(Err(error)) => {
                return CommandResult::failure("simulate", "llm", format!("{error:#}"), 1)
            }
            None => (Box::new(NoSemanticClassifier), Arc::new(FallbackDrafter)),
        };

    let controller = FlowController::new(
        Classifier::new(config.llm.confidence_threshold),
        Box::new(DefaultActionHandler),
    );
    let sink = Arc::new(SuggestionLog::new(&config.flows.suggestions_path));
    let generator = SuggestionGenerator::new(drafter, sink);

    let mut state = ConversationState::new(graph.entry().name.clone(), context);
    println!("bot> {}", render(&graph.entry().bot_prompt, &state.context));

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let utterance = match line {
            Ok(line) => line,
            Err(error) => return CommandResult::failure("simulate", "stdin", error.to_string(), 1),
        };
        if utterance.trim().is_empty() {
            continue;
        }

        let turn = runtime.block_on(controller.take_turn(
            &graph,
            &mut state,
            &utterance,
            semantic.as_ref(),
            Some(&generator),
        ));
        match turn {
            Ok(outcome) => {
                if let Some(reply) = outcome.reply {
                    println!("bot> {reply}");
                }
                if outcome.ended {
                    break;
                }
            }
            Err(TurnError::ConversationOver) => break,
            Err(error) => {
                println!("bot> {}", error.user_message());
                return CommandResult::failure("simulate", "turn", error.to_string(), 1);
            }
        }
        let _ = io::stdout().flush();
    }

    CommandResult::success(
        "simulate",
        format!(
            "conversation finished after {} turn(s) at `{}`",
            state.history().len(),
            state.current_branch()
        ),
    )
}

/// `None` when no API key is configured (offline mode); `Some(Err)` when a key
/// is present but the HTTP client cannot be built.
fn llm_client(config: &AppConfig) -> Option<anyhow::Result<GeminiClient>> {
    if !config.llm_enabled() {
        return None;
    }
    let api_key = config.llm.api_key.clone()?;
    Some(GeminiClient::new(
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        api_key,
        Duration::from_secs(config.llm.timeout_secs),
    ))
}

fn parse_context(pairs: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut context = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                context.insert(key.trim().to_owned(), value.trim().to_owned());
            }
            _ => return Err(format!("context entry `{pair}` is not key=value")),
        }
    }
    Ok(context)
}

#[cfg(test)]
mod tests {
    use branchline_core::AppConfig;

    use super::{llm_client, parse_context};

    #[test]
    fn context_pairs_parse_and_trim() {
        let context = parse_context(&[
            "policy_holder_name=Asha".to_owned(),
            "outstanding_amount = 12,000".to_owned(),
        ])
        .expect("parse");
        assert_eq!(context.get("policy_holder_name").map(String::as_str), Some("Asha"));
        assert_eq!(context.get("outstanding_amount").map(String::as_str), Some("12,000"));
    }

    #[test]
    fn malformed_context_pair_is_rejected() {
        assert!(parse_context(&["just-a-word".to_owned()]).is_err());
    }

    #[test]
    fn no_api_key_means_offline_mode() {
        let config = AppConfig::default();
        assert!(llm_client(&config).is_none());
    }

    #[test]
    fn configured_api_key_builds_the_escalation_client() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("test-key".to_string().into());
        let client = llm_client(&config).expect("llm enabled");
        assert!(client.is_ok());
    }
}
