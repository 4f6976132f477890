//! Structural integrity checks over a tree snapshot.

use std::collections::BTreeSet;

use crate::tree::TaskTree;

/// Validate the tree's structural invariants and return one human-readable
/// violation string per problem found. An empty vector means the tree is
/// well-formed.
///
/// Checked: the root exists and has no parent, no other node claims to be a
/// root, parent/child links agree in both directions, every referenced id
/// resolves, and every node is reachable from the root (which also rules out
/// cycles).
pub fn validate_integrity(tree: &TaskTree) -> Vec<String> {
    let mut violations = Vec::new();

    match tree.nodes.get(&tree.root_id) {
        None => violations.push(format!("root node '{}' is missing", tree.root_id)),
        Some(root) => {
            if let Some(parent_id) = &root.parent_id {
                violations.push(format!(
                    "root node '{}' has parent '{parent_id}'",
                    tree.root_id
                ));
            }
        }
    }

    for (node_id, node) in &tree.nodes {
        if *node_id != node.node_id {
            violations.push(format!(
                "node keyed '{node_id}' carries id '{}'",
                node.node_id
            ));
        }
        if node.parent_id.is_none() && *node_id != tree.root_id {
            violations.push(format!("node '{node_id}' has no parent but is not the root"));
        }

        if let Some(parent_id) = &node.parent_id {
            match tree.nodes.get(parent_id) {
                None => violations.push(format!(
                    "node '{node_id}' references missing parent '{parent_id}'"
                )),
                Some(parent) => {
                    let links = parent
                        .child_ids
                        .iter()
                        .filter(|child_id| *child_id == node_id)
                        .count();
                    if links != 1 {
                        violations.push(format!(
                            "parent '{parent_id}' lists child '{node_id}' {links} times"
                        ));
                    }
                }
            }
        }

        for child_id in &node.child_ids {
            match tree.nodes.get(child_id) {
                None => violations.push(format!(
                    "node '{node_id}' references missing child '{child_id}'"
                )),
                Some(child) => {
                    if child.parent_id.as_deref() != Some(node_id) {
                        violations.push(format!(
                            "child '{child_id}' does not point back at parent '{node_id}'"
                        ));
                    }
                }
            }
        }
    }

    if let Some(focus_id) = &tree.focus_id {
        if !tree.nodes.contains_key(focus_id) {
            violations.push(format!("focus points at missing node '{focus_id}'"));
        }
    }

    // Reachability walk from the root. A node outside the visited set is
    // either orphaned or part of a cycle detached from the root.
    let mut visited = BTreeSet::new();
    let mut stack = vec![tree.root_id.as_str()];
    while let Some(node_id) = stack.pop() {
        if !visited.insert(node_id) {
            continue;
        }
        if let Some(node) = tree.nodes.get(node_id) {
            for child_id in &node.child_ids {
                stack.push(child_id);
            }
        }
    }
    for node_id in tree.nodes.keys() {
        if !visited.contains(node_id.as_str()) {
            violations.push(format!("node '{node_id}' is not reachable from the root"));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{node_with_status, tree_of};
    use crate::tree::NodeStatus;

    #[test]
    fn well_formed_tree_has_no_violations() {
        let tree = tree_of(vec![
            node_with_status("root", None, &["node-1", "node-2"], NodeStatus::Good),
            node_with_status("node-1", Some("root"), &[], NodeStatus::NoResult),
            node_with_status("node-2", Some("root"), &[], NodeStatus::NoResult),
        ]);
        assert_eq!(validate_integrity(&tree), Vec::<String>::new());
    }

    #[test]
    fn missing_child_and_orphan_are_reported() {
        let mut tree = tree_of(vec![
            node_with_status("root", None, &["node-1"], NodeStatus::Good),
            node_with_status("node-1", Some("root"), &[], NodeStatus::NoResult),
        ]);
        if let Some(root) = tree.nodes.get_mut("root") {
            root.child_ids.push("ghost".to_string());
        }
        tree.nodes.insert(
            "node-9".to_string(),
            node_with_status("node-9", Some("root"), &[], NodeStatus::NoResult),
        );

        let violations = validate_integrity(&tree);
        assert!(violations.iter().any(|v| v.contains("missing child 'ghost'")));
        // node-9 claims root as parent but root never lists it.
        assert!(violations.iter().any(|v| v.contains("'node-9' 0 times")));
        assert!(
            violations
                .iter()
                .any(|v| v.contains("'node-9' is not reachable"))
        );
    }

    #[test]
    fn broken_backlink_is_reported() {
        let mut tree = tree_of(vec![
            node_with_status("root", None, &["node-1"], NodeStatus::Good),
            node_with_status("node-1", Some("root"), &[], NodeStatus::NoResult),
        ]);
        if let Some(node) = tree.nodes.get_mut("node-1") {
            node.parent_id = None;
        }

        let violations = validate_integrity(&tree);
        assert!(
            violations
                .iter()
                .any(|v| v.contains("does not point back at parent 'root'"))
        );
        assert!(
            violations
                .iter()
                .any(|v| v.contains("has no parent but is not the root"))
        );
    }

    #[test]
    fn rooted_parent_is_reported() {
        let mut tree = tree_of(vec![
            node_with_status("root", None, &[], NodeStatus::Good),
        ]);
        if let Some(root) = tree.nodes.get_mut("root") {
            root.parent_id = Some("root".to_string());
        }

        let violations = validate_integrity(&tree);
        assert!(violations.iter().any(|v| v.contains("root node 'root' has parent")));
    }

    #[test]
    fn unknown_focus_is_reported() {
        let mut tree = tree_of(vec![node_with_status("root", None, &[], NodeStatus::Good)]);
        tree.focus_id = Some("ghost".to_string());
        let violations = validate_integrity(&tree);
        assert!(violations.iter().any(|v| v.contains("focus points at missing node")));
    }
}
