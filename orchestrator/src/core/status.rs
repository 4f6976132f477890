//! Pure status analysis over a task tree snapshot.
//!
//! `analyze` is a function of its arguments only. It mutates nothing, invokes
//! nothing, and returns the same report for the same tree and retry counts,
//! which is what makes the orchestration loop replayable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::tree::{Node, NodeStatus, TaskTree};

/// Next collaborator dispatch for the focus node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    NeedsSchemaLinking,
    NeedsGeneration,
    NeedsEvaluation,
    NeedsRegeneration,
}

/// Final quality of a completed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallOutcome {
    Success,
    Partial,
    Failure,
}

/// Retries consumed so far, keyed by node id. Nodes absent from the map have
/// consumed none.
pub type RetryCounts = BTreeMap<String, u32>;

/// What the status analysis concluded for one tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<RecommendedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_outcome: Option<OverallOutcome>,
}

/// Analyze one tree snapshot: find the first unprocessed node in depth-first
/// pre-order (parent before children, children in stored order) and map its
/// state to the action it needs. When no such node remains the task is
/// complete and the report carries the overall outcome instead.
pub fn analyze(tree: &TaskTree, retries: &RetryCounts, max_retries: u32) -> StatusReport {
    let mut stack = vec![tree.root_id.as_str()];
    while let Some(node_id) = stack.pop() {
        let Some(node) = tree.nodes.get(node_id) else {
            continue;
        };
        if let Some(action) = classify(node, retries, max_retries) {
            return StatusReport {
                complete: false,
                focus_node_id: Some(node.node_id.clone()),
                recommended_action: Some(action),
                overall_outcome: None,
            };
        }
        // Reverse push so the earliest child is visited first.
        for child_id in node.child_ids.iter().rev() {
            stack.push(child_id);
        }
    }

    StatusReport {
        complete: true,
        focus_node_id: None,
        recommended_action: None,
        overall_outcome: Some(overall_outcome(tree)),
    }
}

/// The action one node needs, or `None` when it is terminal.
fn classify(node: &Node, retries: &RetryCounts, max_retries: u32) -> Option<RecommendedAction> {
    let consumed = retries.get(&node.node_id).copied().unwrap_or(0);
    match node.status {
        NodeStatus::NoResult => {
            if node.schema_linking_result.is_none() {
                Some(RecommendedAction::NeedsSchemaLinking)
            } else if node.generation_result.is_none() {
                Some(RecommendedAction::NeedsGeneration)
            } else {
                // Both slots filled but the status was never advanced; route
                // through evaluation rather than stalling.
                Some(RecommendedAction::NeedsEvaluation)
            }
        }
        NodeStatus::NeedsEvaluation => Some(RecommendedAction::NeedsEvaluation),
        NodeStatus::Bad => {
            if consumed < max_retries {
                Some(RecommendedAction::NeedsRegeneration)
            } else {
                None
            }
        }
        NodeStatus::Good | NodeStatus::RetriesExhausted => None,
    }
}

/// Outcome rules over a complete tree: every node good means success, a good
/// root over failed descendants is partial, anything else is failure. A
/// `root_id` that resolves to no node is a failure outright, never success.
fn overall_outcome(tree: &TaskTree) -> OverallOutcome {
    let Some(root) = tree.root() else {
        return OverallOutcome::Failure;
    };
    let all_good = tree
        .nodes
        .values()
        .all(|node| node.status == NodeStatus::Good);
    if all_good {
        return OverallOutcome::Success;
    }
    if root.status == NodeStatus::Good {
        OverallOutcome::Partial
    } else {
        OverallOutcome::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{node_with_status, tree_of};
    use serde_json::json;

    const MAX_RETRIES: u32 = 3;

    fn analyze_default(tree: &TaskTree) -> StatusReport {
        analyze(tree, &RetryCounts::new(), MAX_RETRIES)
    }

    #[test]
    fn fresh_root_needs_schema_linking() {
        let tree = tree_of(vec![node_with_status("root", None, &[], NodeStatus::NoResult)]);
        let report = analyze_default(&tree);
        assert_eq!(report.focus_node_id.as_deref(), Some("root"));
        assert_eq!(
            report.recommended_action,
            Some(RecommendedAction::NeedsSchemaLinking)
        );
        assert!(!report.complete);
    }

    #[test]
    fn linked_node_needs_generation() {
        let mut node = node_with_status("root", None, &[], NodeStatus::NoResult);
        node.schema_linking_result = Some(json!({"tables": ["users"]}));
        let report = analyze_default(&tree_of(vec![node]));
        assert_eq!(
            report.recommended_action,
            Some(RecommendedAction::NeedsGeneration)
        );
    }

    #[test]
    fn stalled_no_result_node_routes_to_evaluation() {
        let mut node = node_with_status("root", None, &[], NodeStatus::NoResult);
        node.schema_linking_result = Some(json!({}));
        node.generation_result = Some(json!({"artifact": "q"}));
        let report = analyze_default(&tree_of(vec![node]));
        assert_eq!(
            report.recommended_action,
            Some(RecommendedAction::NeedsEvaluation)
        );
    }

    #[test]
    fn needs_evaluation_status_wins_over_slots() {
        let node = node_with_status("root", None, &[], NodeStatus::NeedsEvaluation);
        let report = analyze_default(&tree_of(vec![node]));
        assert_eq!(
            report.recommended_action,
            Some(RecommendedAction::NeedsEvaluation)
        );
    }

    #[test]
    fn bad_node_with_retries_left_regenerates() {
        let node = node_with_status("root", None, &[], NodeStatus::Bad);
        let tree = tree_of(vec![node]);

        let mut retries = RetryCounts::new();
        retries.insert("root".to_string(), MAX_RETRIES - 1);
        let report = analyze(&tree, &retries, MAX_RETRIES);
        assert_eq!(
            report.recommended_action,
            Some(RecommendedAction::NeedsRegeneration)
        );

        retries.insert("root".to_string(), MAX_RETRIES);
        let report = analyze(&tree, &retries, MAX_RETRIES);
        assert!(report.complete);
        assert_eq!(report.overall_outcome, Some(OverallOutcome::Failure));
    }

    #[test]
    fn pre_order_picks_parent_before_children() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1", "node-2"], NodeStatus::NoResult),
            node_with_status("node-1", Some("root"), &[], NodeStatus::NoResult),
            node_with_status("node-2", Some("root"), &[], NodeStatus::NoResult),
        ]);
        let report = analyze_default(&tree);
        assert_eq!(report.focus_node_id.as_deref(), Some("root"));
    }

    #[test]
    fn focus_returns_to_unfinished_root_after_child_goes_good() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1"], NodeStatus::NoResult),
            node_with_status("node-1", Some("root"), &[], NodeStatus::Good),
        ]);
        let report = analyze_default(&tree);
        assert_eq!(report.focus_node_id.as_deref(), Some("root"));
        assert_eq!(
            report.recommended_action,
            Some(RecommendedAction::NeedsSchemaLinking)
        );
    }

    #[test]
    fn pre_order_picks_earliest_unprocessed_child() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1", "node-2"], NodeStatus::Good),
            node_with_status("node-1", Some("root"), &["node-3"], NodeStatus::Good),
            node_with_status("node-2", Some("root"), &[], NodeStatus::NoResult),
            node_with_status("node-3", Some("node-1"), &[], NodeStatus::NoResult),
        ]);
        // node-3 sits in node-1's subtree, which precedes node-2.
        let report = analyze_default(&tree);
        assert_eq!(report.focus_node_id.as_deref(), Some("node-3"));
    }

    #[test]
    fn all_good_is_success() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1"], NodeStatus::Good),
            node_with_status("node-1", Some("root"), &[], NodeStatus::Good),
        ]);
        let report = analyze_default(&tree);
        assert!(report.complete);
        assert_eq!(report.focus_node_id, None);
        assert_eq!(report.overall_outcome, Some(OverallOutcome::Success));
    }

    #[test]
    fn good_root_over_exhausted_child_is_partial() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1"], NodeStatus::Good),
            node_with_status("node-1", Some("root"), &[], NodeStatus::RetriesExhausted),
        ]);
        let report = analyze_default(&tree);
        assert_eq!(report.overall_outcome, Some(OverallOutcome::Partial));
    }

    #[test]
    fn exhausted_root_is_failure() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1"], NodeStatus::RetriesExhausted),
            node_with_status("node-1", Some("root"), &[], NodeStatus::Good),
        ]);
        let report = analyze_default(&tree);
        assert_eq!(report.overall_outcome, Some(OverallOutcome::Failure));
    }

    #[test]
    fn tree_without_root_node_is_failure() {
        let mut tree = tree_of(vec![node_with_status(
            "node-1",
            Some("root"),
            &[],
            NodeStatus::Good,
        )]);
        tree.root_id = "root".to_string();

        let report = analyze_default(&tree);
        assert!(report.complete);
        assert_eq!(report.overall_outcome, Some(OverallOutcome::Failure));
    }

    #[test]
    fn analyze_is_deterministic() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1", "node-2"], NodeStatus::Good),
            node_with_status("node-1", Some("root"), &[], NodeStatus::Bad),
            node_with_status("node-2", Some("root"), &[], NodeStatus::NoResult),
        ]);
        let first = analyze_default(&tree);
        for _ in 0..10 {
            assert_eq!(analyze_default(&tree), first);
        }
    }
}
