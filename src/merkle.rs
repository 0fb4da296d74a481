//! In-memory Merkle DAG keyed by content hash.
//!
//! Node ids are derived purely from node data, so two independently built
//! DAGs assign identical ids to identical data. That property makes the
//! structural diff trivial: a node either exists in both DAGs (same id) or
//! it does not — "modified" cannot occur at the node level, and changes
//! surface as one removed id plus one added id. The file synchronizer
//! layers a path-keyed view on top to recover per-file modifications.
//!
//! DAGs are short-lived: the synchronizer builds one per diff computation
//! and discards it afterwards. Serialization exists so a DAG can round-trip
//! through its persisted form exactly (ids, edges, and root order).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hashing;

/// A DAG node. `id` is the 16-hex digest of `data`; parent and child
/// lists are insertion-ordered and deduped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub id: String,
    pub data: String,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

/// Result of a structural diff between two DAGs.
///
/// `modified` is always empty — content-addressed ids cannot change in
/// place — but the tri-partition is part of the contract so callers that
/// layer a keyed view on top can reuse the shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DagDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl DagDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Serialized form: a plain record of nodes and root ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedDag {
    pub nodes: Vec<MerkleNode>,
    pub root_ids: Vec<String>,
}

/// In-memory DAG of content-addressed nodes.
#[derive(Debug, Clone, Default)]
pub struct MerkleDag {
    nodes: HashMap<String, MerkleNode>,
    root_ids: Vec<String>,
}

impl MerkleDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node derived from `data`, optionally under `parent`.
    ///
    /// - Existing id: the node is reused (content-addressing makes this
    ///   idempotent, and it is what prevents cycles — an id equal to an
    ///   ancestor's id is the same node, not a back-edge).
    /// - `parent` omitted: a newly inserted node becomes a root.
    /// - `parent` present and known: a bidirectional edge is recorded.
    /// - `parent` present but unknown: the node is inserted with no edge
    ///   and is *not* a root.
    ///
    /// Returns the node id.
    pub fn add_node(&mut self, data: &str, parent: Option<&str>) -> String {
        let id = hashing::hash_str(data);

        let newly_inserted = if self.nodes.contains_key(&id) {
            false
        } else {
            self.nodes.insert(
                id.clone(),
                MerkleNode {
                    id: id.clone(),
                    data: data.to_string(),
                    parents: Vec::new(),
                    children: Vec::new(),
                },
            );
            true
        };

        match parent {
            None => {
                if newly_inserted && !self.root_ids.contains(&id) {
                    self.root_ids.push(id.clone());
                }
            }
            Some(parent_id) => {
                if self.nodes.contains_key(parent_id) {
                    let parent_node = self.nodes.get_mut(parent_id).expect("parent exists");
                    if !parent_node.children.contains(&id) {
                        parent_node.children.push(id.clone());
                    }
                    let node = self.nodes.get_mut(&id).expect("node just inserted");
                    if !node.parents.contains(&parent_id.to_string()) {
                        node.parents.push(parent_id.to_string());
                    }
                }
                // Unknown parent: node stays edge-less and rootless.
            }
        }

        id
    }

    pub fn get_node(&self, id: &str) -> Option<&MerkleNode> {
        self.nodes.get(id)
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &MerkleNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Roots in insertion order.
    pub fn roots(&self) -> Vec<&MerkleNode> {
        self.root_ids
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Nodes with no children.
    pub fn leaves(&self) -> Vec<&MerkleNode> {
        let mut leaves: Vec<&MerkleNode> = self
            .nodes
            .values()
            .filter(|n| n.children.is_empty())
            .collect();
        leaves.sort_by(|a, b| a.id.cmp(&b.id));
        leaves
    }

    /// Plain record of nodes (sorted by id for determinism) and root ids.
    pub fn serialize(&self) -> SerializedDag {
        let mut nodes: Vec<MerkleNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        SerializedDag {
            nodes,
            root_ids: self.root_ids.clone(),
        }
    }

    /// Rebuild a DAG from its serialized record, preserving edges, roots,
    /// and ids exactly.
    pub fn deserialize(record: SerializedDag) -> Self {
        let mut nodes = HashMap::with_capacity(record.nodes.len());
        for node in record.nodes {
            nodes.insert(node.id.clone(), node);
        }
        Self {
            nodes,
            root_ids: record.root_ids,
        }
    }

    /// Structural diff by node id: `added = next ∖ prev`,
    /// `removed = prev ∖ next`, `modified = ∅`.
    pub fn compare(prev: &MerkleDag, next: &MerkleDag) -> DagDiff {
        let mut added: Vec<String> = next
            .nodes
            .keys()
            .filter(|id| !prev.nodes.contains_key(*id))
            .cloned()
            .collect();
        let mut removed: Vec<String> = prev
            .nodes
            .keys()
            .filter(|id| !next.nodes.contains_key(*id))
            .cloned()
            .collect();
        added.sort();
        removed.sort();
        DagDiff {
            added,
            removed,
            modified: Vec::new(),
        }
    }
}
