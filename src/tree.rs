//! Tree listing over live canonical paths.
//!
//! Builds a folder/file hierarchy from the flat path list with an arena of
//! nodes keyed by path — explicit stack assembly, no recursion, no pointer
//! cycles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeNodeKind {
    Folder,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    pub kind: TreeNodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeView {
    pub tree: Vec<TreeNode>,
    pub note_count: usize,
}

/// Build the hierarchy for a flat list of live note paths.
pub fn build_tree(paths: &[String]) -> TreeView {
    let note_count = paths.len();

    // Arena keyed by full path; children recorded as path keys. BTreeMaps
    // keep sibling order alphabetical and assembly deterministic.
    let mut arena: BTreeMap<String, TreeNode> = BTreeMap::new();
    let mut children_of: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for path in paths {
        let mut parent = String::new();
        let mut walked = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        for (i, segment) in segments.iter().enumerate() {
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(segment);
            let is_leaf = i == segments.len() - 1;
            if !arena.contains_key(&walked) {
                arena.insert(
                    walked.clone(),
                    TreeNode {
                        name: segment.to_string(),
                        path: walked.clone(),
                        kind: if is_leaf {
                            TreeNodeKind::Note
                        } else {
                            TreeNodeKind::Folder
                        },
                        children: Vec::new(),
                    },
                );
                let siblings = children_of.entry(parent.clone()).or_default();
                if !siblings.contains(&walked) {
                    siblings.push(walked.clone());
                }
            }
            parent = walked.clone();
        }
    }

    // Attach deepest-first so every child is complete before its parent
    // takes it out of the arena.
    let mut keys: Vec<String> = arena.keys().cloned().collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.matches('/').count()));
    for key in keys {
        let child_keys = children_of.remove(&key).unwrap_or_default();
        let mut children: Vec<TreeNode> = child_keys
            .into_iter()
            .filter_map(|ck| arena.remove(&ck))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(node) = arena.get_mut(&key) {
            node.children = children;
        }
    }

    let mut roots: Vec<TreeNode> = children_of
        .remove("")
        .unwrap_or_default()
        .into_iter()
        .filter_map(|k| arena.remove(&k))
        .collect();
    roots.sort_by(|a, b| a.name.cmp(&b.name));

    TreeView {
        tree: roots,
        note_count,
    }
}
