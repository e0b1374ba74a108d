use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::branch::{Branch, BranchAction};
use crate::errors::GraphError;
use crate::interrupt::{InterruptionPattern, Overlay};

pub const DEFAULT_ENTRY_BRANCH: &str = "greeting";

/// Document-level metadata carried alongside the branches.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct GraphMetadata {
    #[serde(default = "default_entry")]
    pub entry_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

fn default_entry() -> String {
    DEFAULT_ENTRY_BRANCH.to_owned()
}

impl Default for GraphMetadata {
    fn default() -> Self {
        Self { entry_branch: default_entry(), description: None, version: None }
    }
}

/// Non-fatal findings from the reachability analysis. These warn the operator;
/// they never block a commit.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct GraphHealth {
    /// Branches no path from the entry reaches, even through activation
    /// conditions and interruption jumps.
    pub unreachable: Vec<String>,
    /// Branches from which no closure branch can be reached.
    pub cannot_reach_closure: Vec<String>,
}

impl GraphHealth {
    pub fn is_clean(&self) -> bool {
        self.unreachable.is_empty() && self.cannot_reach_closure.is_empty()
    }
}

/// An immutable, fully-validated snapshot of the dialogue graph. Mutation goes
/// through rebuilding a candidate with [`BranchGraph::from_parts`] and swapping
/// the whole snapshot; readers never observe a partially-linked graph.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchGraph {
    metadata: GraphMetadata,
    branches: BTreeMap<String, Branch>,
    overlay: Overlay,
}

impl BranchGraph {
    /// Build and validate a snapshot. Fails fast on the first structural
    /// problem; on error no snapshot exists at all.
    pub fn from_parts(
        metadata: GraphMetadata,
        branches: Vec<Branch>,
        patterns: Vec<InterruptionPattern>,
    ) -> Result<Self, GraphError> {
        let mut by_name = BTreeMap::new();
        for branch in branches {
            let name = branch.name.clone();
            if by_name.insert(name.clone(), branch).is_some() {
                return Err(GraphError::DuplicateBranch(name));
            }
        }

        if !by_name.contains_key(&metadata.entry_branch) {
            return Err(GraphError::MissingEntry(metadata.entry_branch.clone()));
        }

        for branch in by_name.values() {
            for rule in branch.expected_responses.iter() {
                if let Some(target) = &rule.next {
                    if !by_name.contains_key(target) {
                        return Err(GraphError::DanglingNext {
                            branch: branch.name.clone(),
                            category: rule.category.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
            for condition in &branch.activation_conditions {
                if !by_name.contains_key(&condition.previous_branch) {
                    return Err(GraphError::DanglingActivation {
                        branch: branch.name.clone(),
                        previous: condition.previous_branch.clone(),
                    });
                }
            }
        }

        for pattern in &patterns {
            for stage in pattern.interruptible_stages.stages() {
                if !by_name.contains_key(stage) {
                    return Err(GraphError::DanglingInterruptibleStage {
                        pattern: pattern.name.clone(),
                        stage: stage.clone(),
                    });
                }
            }
            if let Some(target) = &pattern.target_stage {
                if !by_name.contains_key(target) {
                    return Err(GraphError::DanglingInterruptibleStage {
                        pattern: pattern.name.clone(),
                        stage: target.clone(),
                    });
                }
            }
        }

        Ok(Self { metadata, branches: by_name, overlay: Overlay::new(patterns) })
    }

    pub fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    pub fn get(&self, name: &str) -> Option<&Branch> {
        self.branches.get(name)
    }

    /// Finite, restartable iteration over every branch.
    pub fn all(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn entry(&self) -> &Branch {
        // Validated at construction; the entry always resolves.
        &self.branches[&self.metadata.entry_branch]
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// A closure branch carries the END_CALL action or has no outgoing edge.
    pub fn is_closure(&self, name: &str) -> bool {
        match self.branches.get(name) {
            Some(branch) => {
                branch.action == Some(BranchAction::EndCall) || !branch.has_outgoing()
            }
            None => false,
        }
    }

    /// The learned branch (if any) activated when `previous_branch` records
    /// `previous_category`. First declaration wins when several claim the same
    /// trigger pair.
    pub fn activated_branch(
        &self,
        previous_branch: &str,
        previous_category: &str,
    ) -> Option<&Branch> {
        self.branches
            .values()
            .find(|branch| branch.is_activated_by(previous_branch, previous_category))
    }

    /// Clones the parts needed to build a mutated candidate snapshot.
    pub fn to_parts(&self) -> (GraphMetadata, Vec<Branch>, Vec<InterruptionPattern>) {
        (
            self.metadata.clone(),
            self.branches.values().cloned().collect(),
            self.overlay.patterns().to_vec(),
        )
    }

    /// Reachability analysis over `next` edges, activation conditions, and
    /// interruption jump targets. Findings are advisory.
    pub fn health(&self) -> GraphHealth {
        let mut reachable = BTreeSet::new();
        let mut frontier = VecDeque::from([self.metadata.entry_branch.clone()]);
        while let Some(name) = frontier.pop_front() {
            if !reachable.insert(name.clone()) {
                continue;
            }
            let Some(branch) = self.branches.get(&name) else { continue };
            for rule in branch.expected_responses.iter() {
                if let Some(target) = &rule.next {
                    frontier.push_back(target.clone());
                }
            }
            // A reachable branch can activate learned successors.
            for candidate in self.branches.values() {
                if candidate
                    .activation_conditions
                    .iter()
                    .any(|condition| condition.previous_branch == name)
                {
                    frontier.push_back(candidate.name.clone());
                }
            }
        }
        for pattern in self.overlay.patterns() {
            if let Some(target) = &pattern.target_stage {
                if reachable.insert(target.clone()) {
                    // Jump targets open their own subtrees.
                    let mut sub = VecDeque::from([target.clone()]);
                    while let Some(name) = sub.pop_front() {
                        let Some(branch) = self.branches.get(&name) else { continue };
                        for rule in branch.expected_responses.iter() {
                            if let Some(next) = &rule.next {
                                if reachable.insert(next.clone()) {
                                    sub.push_back(next.clone());
                                }
                            }
                        }
                    }
                }
            }
        }

        let unreachable: Vec<String> = self
            .branches
            .keys()
            .filter(|name| !reachable.contains(*name))
            .cloned()
            .collect();

        // Walk backwards from closures over reversed `next` edges.
        let mut reaches_closure: BTreeSet<String> = self
            .branches
            .keys()
            .filter(|name| self.is_closure(name))
            .cloned()
            .collect();
        loop {
            let mut grew = false;
            for branch in self.branches.values() {
                if reaches_closure.contains(&branch.name) {
                    continue;
                }
                let leads_on = branch.expected_responses.iter().any(|rule| {
                    rule.next.as_ref().is_some_and(|target| reaches_closure.contains(target))
                });
                if leads_on {
                    reaches_closure.insert(branch.name.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        let cannot_reach_closure: Vec<String> = self
            .branches
            .keys()
            .filter(|name| reachable.contains(*name) && !reaches_closure.contains(*name))
            .cloned()
            .collect();

        GraphHealth { unreachable, cannot_reach_closure }
    }
}

#[cfg(test)]
mod tests {
    use crate::branch::{ActivationCondition, Branch, BranchAction, Keywords, ResponseRule};
    use crate::errors::GraphError;
    use crate::interrupt::{InterruptionAction, InterruptionPattern, StageFilter};

    use super::{BranchGraph, GraphMetadata};

    fn branch(name: &str, rules: Vec<(&str, Option<&str>)>) -> Branch {
        Branch {
            name: name.to_owned(),
            intent: format!("intent_{name}"),
            bot_prompt: format!("Prompt for {name}."),
            expected_responses: rules
                .into_iter()
                .map(|(category, next)| ResponseRule {
                    category: category.to_owned(),
                    keywords: Keywords::Literal(vec![category.to_owned()]),
                    next: next.map(str::to_owned),
                    response_template: None,
                })
                .collect(),
            activation_conditions: Vec::new(),
            action: None,
        }
    }

    fn closure() -> Branch {
        let mut b = branch("closure", vec![]);
        b.action = Some(BranchAction::EndCall);
        b
    }

    fn sample() -> Vec<Branch> {
        vec![
            branch("greeting", vec![("positive", Some("policy_confirmation"))]),
            branch(
                "policy_confirmation",
                vec![("positive", Some("closure")), ("negative", Some("closure"))],
            ),
            closure(),
        ]
    }

    #[test]
    fn dangling_next_rejects_the_whole_snapshot() {
        let mut branches = sample();
        branches.push(branch("payment_followup", vec![("positive", Some("payment_details"))]));

        let error = BranchGraph::from_parts(GraphMetadata::default(), branches, Vec::new())
            .expect_err("must reject");
        assert_eq!(
            error,
            GraphError::DanglingNext {
                branch: "payment_followup".to_owned(),
                category: "positive".to_owned(),
                target: "payment_details".to_owned(),
            }
        );
    }

    #[test]
    fn duplicate_branch_name_is_rejected() {
        let mut branches = sample();
        branches.push(branch("greeting", vec![]));
        let error = BranchGraph::from_parts(GraphMetadata::default(), branches, Vec::new())
            .expect_err("must reject");
        assert_eq!(error, GraphError::DuplicateBranch("greeting".to_owned()));
    }

    #[test]
    fn missing_entry_branch_is_rejected() {
        let error = BranchGraph::from_parts(
            GraphMetadata { entry_branch: "welcome".to_owned(), ..Default::default() },
            sample(),
            Vec::new(),
        )
        .expect_err("must reject");
        assert_eq!(error, GraphError::MissingEntry("welcome".to_owned()));
    }

    #[test]
    fn interruption_stage_filter_must_name_real_branches() {
        let pattern = InterruptionPattern {
            name: "callback".to_owned(),
            keywords: vec!["call me later".to_owned()],
            action: InterruptionAction::ScheduleCallback,
            target_stage: None,
            response_template: None,
            interruptible_stages: StageFilter::Only(vec!["payment_negotiation".to_owned()]),
            follow_ups: Vec::new(),
        };
        let error = BranchGraph::from_parts(GraphMetadata::default(), sample(), vec![pattern])
            .expect_err("must reject");
        assert_eq!(
            error,
            GraphError::DanglingInterruptibleStage {
                pattern: "callback".to_owned(),
                stage: "payment_negotiation".to_owned(),
            }
        );
    }

    #[test]
    fn closure_detection_covers_action_and_missing_edges() {
        let graph =
            BranchGraph::from_parts(GraphMetadata::default(), sample(), Vec::new()).expect("valid");
        assert!(graph.is_closure("closure"));
        assert!(!graph.is_closure("greeting"));
    }

    #[test]
    fn activation_lookup_finds_learned_branch() {
        let mut branches = sample();
        let mut learned = branch("policy_confirmation_handled", vec![("positive", Some("closure"))]);
        learned.activation_conditions = vec![ActivationCondition {
            previous_branch: "policy_confirmation".to_owned(),
            previous_category: "neutral".to_owned(),
            trigger: "ok".to_owned(),
        }];
        branches.push(learned);

        let graph = BranchGraph::from_parts(GraphMetadata::default(), branches, Vec::new())
            .expect("valid");
        let activated = graph
            .activated_branch("policy_confirmation", "neutral")
            .expect("activated branch");
        assert_eq!(activated.name, "policy_confirmation_handled");
        assert!(graph.activated_branch("greeting", "neutral").is_none());
    }

    #[test]
    fn health_flags_unreachable_and_dead_end_branches() {
        let mut branches = sample();
        branches.push(branch("orphan", vec![("positive", Some("closure"))]));
        branches.push(branch("loop_a", vec![("positive", Some("loop_b"))]));
        branches.push(branch("loop_b", vec![("positive", Some("loop_a"))]));
        // Wire the loop into the reachable graph without an exit.
        if let Some(greeting) = branches.iter_mut().find(|b| b.name == "greeting") {
            greeting.expected_responses.upsert(ResponseRule {
                category: "neutral".to_owned(),
                keywords: Keywords::Literal(vec!["maybe".to_owned()]),
                next: Some("loop_a".to_owned()),
                response_template: None,
            });
        }

        let graph = BranchGraph::from_parts(GraphMetadata::default(), branches, Vec::new())
            .expect("valid");
        let health = graph.health();
        assert_eq!(health.unreachable, vec!["orphan".to_owned()]);
        assert_eq!(health.cannot_reach_closure, vec!["loop_a".to_owned(), "loop_b".to_owned()]);
        assert!(!health.is_clean());
    }

    #[test]
    fn empty_keyword_branch_with_no_rules_is_a_natural_closure() {
        let branches = vec![branch("greeting", vec![("positive", Some("farewell"))]), {
            let mut b = branch("farewell", vec![]);
            b.expected_responses = crate::branch::ResponseRules::default();
            b
        }];
        let graph = BranchGraph::from_parts(GraphMetadata::default(), branches, Vec::new())
            .expect("valid");
        assert!(graph.is_closure("farewell"));
        assert!(graph.health().is_clean());
    }

    #[test]
    fn default_metadata_enters_at_greeting() {
        let graph =
            BranchGraph::from_parts(GraphMetadata::default(), sample(), Vec::new()).expect("valid");
        assert_eq!(graph.entry().name, "greeting");
    }

    #[test]
    fn to_parts_round_trips_into_an_equal_snapshot() {
        let graph =
            BranchGraph::from_parts(GraphMetadata::default(), sample(), Vec::new()).expect("valid");
        let (metadata, branches, patterns) = graph.to_parts();
        let rebuilt = BranchGraph::from_parts(metadata, branches, patterns).expect("valid");
        assert_eq!(graph, rebuilt);
    }

}
