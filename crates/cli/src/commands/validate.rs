use serde_json::json;

use branchline_core::AppConfig;
use branchline_store::FlowStore;

use super::CommandResult;

/// Load the branches document, run full structural validation, and report the
/// reachability health findings.
pub fn run(config: &AppConfig, json: bool) -> CommandResult {
    let store = FlowStore::new(&config.flows.branches_path);
    let graph = match store.load() {
        Ok(graph) => graph,
        Err(error) => {
            return CommandResult::failure("validate", "graph", error.to_string(), 1);
        }
    };

    let health = graph.health();
    if json {
        let payload = json!({
            "command": "validate",
            "status": "ok",
            "branches": graph.len(),
            "entry_branch": graph.entry().name,
            "interruptions": graph.overlay().patterns().len(),
            "health": {
                "unreachable": health.unreachable,
                "cannot_reach_closure": health.cannot_reach_closure,
            },
        });
        return CommandResult::plain(0, payload.to_string());
    }

    let mut lines = vec![format!(
        "{}: {} branches, {} interruption patterns, entry `{}`",
        store.path().display(),
        graph.len(),
        graph.overlay().patterns().len(),
        graph.entry().name,
    )];
    if health.is_clean() {
        lines.push("health: all branches reachable, every path can close".to_string());
    } else {
        for name in &health.unreachable {
            lines.push(format!("health: `{name}` is unreachable from the entry branch"));
        }
        for name in &health.cannot_reach_closure {
            lines.push(format!("health: `{name}` cannot reach any closure branch"));
        }
    }
    CommandResult::plain(0, lines.join("\n"))
}
