use branchline_core::{Applier, AppConfig, SuggestionSink};
use branchline_store::{FlowStore, SuggestionLog};

use super::CommandResult;

pub fn list(config: &AppConfig) -> CommandResult {
    let log = SuggestionLog::new(&config.flows.suggestions_path);
    let pending = match log.pending() {
        Ok(pending) => pending,
        Err(error) => return CommandResult::failure("suggestions list", "log", error.to_string(), 1),
    };

    if pending.is_empty() {
        return CommandResult::plain(0, "no pending suggestions");
    }

    let mut lines = vec![format!("{} pending suggestion(s):", pending.len())];
    for item in Applier.review(&pending) {
        lines.push(format!(
            "  [{}] {} `{}` (intent: {})",
            item.index, item.operation, item.branch_name, item.intent
        ));
        for activation in &item.activations {
            lines.push(format!("      activated by {activation}"));
        }
    }
    CommandResult::plain(0, lines.join("\n"))
}

/// Commit the selected pending mutations (all of them when `indices` is
/// empty). The document is only rewritten if the whole batch validates.
pub fn apply(config: &AppConfig, indices: &[usize]) -> CommandResult {
    let log = SuggestionLog::new(&config.flows.suggestions_path);
    let pending = match log.pending() {
        Ok(pending) => pending,
        Err(error) => {
            return CommandResult::failure("suggestions apply", "log", error.to_string(), 1)
        }
    };
    if pending.is_empty() {
        return CommandResult::plain(0, "no pending suggestions");
    }

    let selected = if indices.is_empty() {
        pending
    } else {
        let mut picked = Vec::new();
        for &index in indices {
            match pending.get(index) {
                Some(mutation) => picked.push(mutation.clone()),
                None => {
                    return CommandResult::failure(
                        "suggestions apply",
                        "selection",
                        format!("no suggestion at index {index}"),
                        2,
                    )
                }
            }
        }
        picked
    };

    let store = FlowStore::new(&config.flows.branches_path);
    let graph = match store.load() {
        Ok(graph) => graph,
        Err(error) => {
            return CommandResult::failure("suggestions apply", "graph", error.to_string(), 1)
        }
    };

    let outcome = match Applier.commit(&graph, selected) {
        Ok(outcome) => outcome,
        Err(error) => {
            return CommandResult::failure("suggestions apply", "validation", error.to_string(), 1)
        }
    };

    if let Err(error) = store.save(&outcome.graph) {
        return CommandResult::failure("suggestions apply", "store", error.to_string(), 1);
    }
    if let Err(error) = log.drain(&outcome.applied) {
        return CommandResult::failure("suggestions apply", "log", error.to_string(), 1);
    }

    CommandResult::success(
        "suggestions apply",
        format!("applied {} mutation(s), graph now has {} branches", outcome.applied.len(), outcome.graph.len()),
    )
}

pub fn clear(config: &AppConfig) -> CommandResult {
    let log = SuggestionLog::new(&config.flows.suggestions_path);
    match log.clear() {
        Ok(()) => CommandResult::success("suggestions clear", "pending suggestions dropped"),
        Err(error) => CommandResult::failure("suggestions clear", "log", error.to_string(), 1),
    }
}
