use std::collections::BTreeMap;

use tracing::info;
use uuid::Uuid;

use crate::branch::{Branch, Keywords, ResponseRule};
use crate::errors::GraphError;
use crate::graph::BranchGraph;

use super::types::{MutationOperation, PendingMutation};

/// One line of the operator review listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewItem {
    pub index: usize,
    pub id: Uuid,
    pub operation: &'static str,
    pub branch_name: String,
    pub intent: String,
    pub activations: Vec<String>,
}

/// A successfully committed batch: the new snapshot plus the mutation ids the
/// log should drop.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    pub graph: BranchGraph,
    pub applied: Vec<Uuid>,
}

/// Reviews and commits queued mutations. Commit is all-or-nothing: the merged
/// batch either produces a fully-validated snapshot or nothing changes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Applier;

impl Applier {
    pub fn review(&self, pending: &[PendingMutation]) -> Vec<ReviewItem> {
        pending
            .iter()
            .enumerate()
            .map(|(index, mutation)| ReviewItem {
                index,
                id: mutation.id,
                operation: mutation.operation.key(),
                branch_name: mutation.branch.name.clone(),
                intent: mutation.branch.intent.clone(),
                activations: mutation
                    .activation_conditions
                    .iter()
                    .map(|condition| {
                        format!(
                            "{} / {} / \"{}\"",
                            condition.previous_branch,
                            condition.previous_category,
                            condition.trigger
                        )
                    })
                    .collect(),
            })
            .collect()
    }

    /// Merge the batch, fold it into a candidate snapshot, wire activation
    /// edges, and validate the union. Duplicate branch names collapse to one
    /// mutation: the later payload wins, activation conditions are unioned.
    pub fn commit(
        &self,
        graph: &BranchGraph,
        selected: Vec<PendingMutation>,
    ) -> Result<CommitOutcome, GraphError> {
        let applied: Vec<Uuid> = selected.iter().map(|mutation| mutation.id).collect();
        let merged = merge(selected);

        let (metadata, branches, patterns) = graph.to_parts();
        let mut working: BTreeMap<String, Branch> =
            branches.into_iter().map(|branch| (branch.name.clone(), branch)).collect();

        for mutation in merged {
            let name = mutation.branch.name.clone();
            let mut incoming = mutation.branch;
            incoming.activation_conditions = mutation.activation_conditions.clone();

            match working.get(&name) {
                Some(existing) => {
                    // Create-on-existing is treated as an update; conditions
                    // already on the live branch are kept.
                    for condition in &existing.activation_conditions {
                        if !incoming.activation_conditions.contains(condition) {
                            incoming.activation_conditions.push(condition.clone());
                        }
                    }
                    if existing.action.is_some() && incoming.action.is_none() {
                        incoming.action = existing.action;
                    }
                }
                None => {
                    if mutation.operation == MutationOperation::Update {
                        return Err(GraphError::UnknownBranch(name));
                    }
                }
            }

            // Wire each activation into the previous branch so the learned
            // branch is linked (and reachable) from where it was triggered.
            for condition in &incoming.activation_conditions {
                if let Some(previous) = working.get_mut(&condition.previous_branch) {
                    previous.expected_responses.upsert(ResponseRule {
                        category: condition.previous_category.clone(),
                        keywords: Keywords::Literal(Vec::new()),
                        next: Some(name.clone()),
                        response_template: None,
                    });
                }
            }

            working.insert(name, incoming);
        }

        let candidate =
            BranchGraph::from_parts(metadata, working.into_values().collect(), patterns)?;
        info!(applied = applied.len(), branches = candidate.len(), "suggestion batch committed");
        Ok(CommitOutcome { graph: candidate, applied })
    }
}

fn merge(selected: Vec<PendingMutation>) -> Vec<PendingMutation> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: BTreeMap<String, PendingMutation> = BTreeMap::new();
    for mutation in selected {
        let name = mutation.branch.name.clone();
        match by_name.get_mut(&name) {
            Some(existing) => {
                let mut conditions = existing.activation_conditions.clone();
                for condition in &mutation.activation_conditions {
                    if !conditions.contains(condition) {
                        conditions.push(condition.clone());
                    }
                }
                let mut winner = mutation;
                winner.activation_conditions = conditions;
                *existing = winner;
            }
            None => {
                order.push(name.clone());
                by_name.insert(name, mutation);
            }
        }
    }
    order.into_iter().filter_map(|name| by_name.remove(&name)).collect()
}
