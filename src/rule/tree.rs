//! Browser definition tree
//! Insertion-ordered node map plus parent resolution, cycle checks and linearization

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::model::{BrowserDefinition, RuleScope, DEFAULT_ROOT_ID};
use crate::error::{BcResult, BrowserCapsError};

/// What to do with a machine-level node whose parent is not declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentResolution {
    /// Drop the node (and, transitively, its children).
    Skip,
    /// Attach the node under another, existing node.
    Reparent(String),
}

/// Extension point for layered configurations.
///
/// Only consulted for `RuleScope::Machine` nodes; application nodes with a
/// missing parent always fail.
pub trait TreeHooks: Send + Sync {
    fn unrecognized_parent(&self, node: &BrowserDefinition, parent: &str) -> BcResult<ParentResolution> {
        Err(unresolved(node, parent))
    }
}

/// Default hooks: every missing parent is fatal.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictParents;

impl TreeHooks for StrictParents {}

/// Node of a linearized tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearNode {
    pub id: String,
    pub depth: usize,
}

/// Ordered mapping from node id to definition. Ids are case-insensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserTree {
    name: String,
    root: Option<String>,
    nodes: Vec<BrowserDefinition>,
    index: HashMap<String, usize>,
    pending_refs: Vec<BrowserDefinition>,
}

impl BrowserTree {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a node. Ref nodes are queued for merging; a second non-ref node
    /// with an existing id is a fatal error.
    pub fn insert(&mut self, definition: BrowserDefinition) -> BcResult<()> {
        if definition.is_ref() {
            self.pending_refs.push(definition);
            return Ok(());
        }

        let key = definition.key();
        if self.index.contains_key(&key) {
            return Err(BrowserCapsError::DuplicateId {
                file: definition.file.clone(),
                line: definition.line,
                id: definition.id.clone(),
            });
        }
        self.index.insert(key, self.nodes.len());
        self.nodes.push(definition);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(&id.to_lowercase())
    }

    pub fn get(&self, id: &str) -> Option<&BrowserDefinition> {
        self.index.get(&id.to_lowercase()).map(|&i| &self.nodes[i])
    }

    /// Nodes in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &BrowserDefinition> {
        self.nodes.iter()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.as_deref()
    }

    pub fn root(&self) -> Option<&BrowserDefinition> {
        self.root.as_deref().and_then(|id| self.get(id))
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.get(id);
        while let Some(node) = current {
            let Some(parent) = node.parent_id.as_deref().and_then(|p| self.get(p)) else {
                break;
            };
            chain.push(parent.id.as_str());
            // bounded even if called on a tree that was never normalized
            if chain.len() > self.nodes.len() {
                break;
            }
            current = Some(parent);
        }
        chain
    }

    /// Resolve parents, attach children and refs, check for cycles and pick the root.
    pub fn normalize(&mut self, hooks: &dyn TreeHooks) -> BcResult<()> {
        // 1. Every parent must exist, or be fixed up by the hooks
        self.resolve_parents(hooks)?;

        // 2. Attach children in insertion order, gateways and browsers apart
        for node in &mut self.nodes {
            node.gateways.clear();
            node.browsers.clear();
        }
        for i in 0..self.nodes.len() {
            let Some(parent) = self.nodes[i].parent_id.as_deref() else {
                continue;
            };
            let parent_idx = self.index[&parent.to_lowercase()];
            let (id, is_gateway) = (self.nodes[i].id.clone(), self.nodes[i].is_gateway());
            let parent_node = &mut self.nodes[parent_idx];
            if is_gateway {
                parent_node.gateways.push(id);
            } else {
                parent_node.browsers.push(id);
            }
        }

        // 3. Merge ref nodes into their targets' ref lists
        self.attach_refs(hooks)?;

        // 4. No node may be its own ancestor
        self.check_cycles()?;

        // 5. "Default", else the first parentless node
        self.root = if self.contains(DEFAULT_ROOT_ID) {
            self.get(DEFAULT_ROOT_ID).map(|n| n.id.clone())
        } else {
            self.nodes.iter().find(|n| n.parent_id.is_none()).map(|n| n.id.clone())
        };

        debug!(
            "tree '{}' normalized: {} nodes, root {:?}",
            self.name,
            self.nodes.len(),
            self.root
        );
        Ok(())
    }

    fn resolve_parents(&mut self, hooks: &dyn TreeHooks) -> BcResult<()> {
        loop {
            let mut skipped = HashSet::new();
            for i in 0..self.nodes.len() {
                let Some(parent) = self.nodes[i].parent_id.clone() else {
                    continue;
                };
                if self.contains(&parent) {
                    continue;
                }
                match missing_parent(&self.nodes[i], &parent, hooks)? {
                    ParentResolution::Skip => {
                        warn!("skipping '{}': parent '{}' is not declared", self.nodes[i].id, parent);
                        skipped.insert(i);
                    }
                    ParentResolution::Reparent(new_parent) => {
                        if !self.contains(&new_parent) {
                            return Err(unresolved(&self.nodes[i], &new_parent));
                        }
                        self.nodes[i].parent_id = Some(new_parent);
                    }
                }
            }

            if skipped.is_empty() {
                return Ok(());
            }
            // children of skipped nodes are re-examined on the next pass
            let nodes = std::mem::take(&mut self.nodes);
            self.nodes = nodes
                .into_iter()
                .enumerate()
                .filter(|(i, _)| !skipped.contains(i))
                .map(|(_, node)| node)
                .collect();
            self.rebuild_index();
        }
    }

    fn attach_refs(&mut self, hooks: &dyn TreeHooks) -> BcResult<()> {
        for mut reference in std::mem::take(&mut self.pending_refs) {
            let target = reference.ref_id.clone().unwrap_or_else(|| reference.id.clone());
            let target = if self.contains(&target) {
                target
            } else {
                match missing_parent(&reference, &target, hooks)? {
                    ParentResolution::Skip => continue,
                    ParentResolution::Reparent(other) if self.contains(&other) => other,
                    ParentResolution::Reparent(other) => return Err(unresolved(&reference, &other)),
                }
            };

            let idx = self.index[&target.to_lowercase()];
            reference.id = self.nodes[idx].id.clone();
            if reference.is_gateway() {
                self.nodes[idx].ref_gateways.push(reference);
            } else {
                self.nodes[idx].ref_browsers.push(reference);
            }
        }
        Ok(())
    }

    fn check_cycles(&self) -> BcResult<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            let mut seen = HashSet::new();
            let mut current = Some(i);
            while let Some(idx) = current {
                if !seen.insert(idx) {
                    return Err(BrowserCapsError::CircularReference {
                        file: node.file.clone(),
                        line: node.line,
                        id: node.id.clone(),
                    });
                }
                current = self.nodes[idx]
                    .parent_id
                    .as_deref()
                    .and_then(|p| self.index.get(&p.to_lowercase()).copied());
            }
        }
        Ok(())
    }

    /// Move every subtree rooted at a parentless node other than the root into its own tree.
    pub fn split_custom_trees(&mut self) -> Vec<BrowserTree> {
        let custom_roots: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent_id.is_none() && Some(n.id.as_str()) != self.root.as_deref())
            .map(|(i, _)| i)
            .collect();
        if custom_roots.is_empty() {
            return Vec::new();
        }

        // owner[i] = index into custom_roots
        let mut owner: Vec<Option<usize>> = vec![None; self.nodes.len()];
        for (tree_idx, &root_idx) in custom_roots.iter().enumerate() {
            let mut stack = vec![root_idx];
            while let Some(idx) = stack.pop() {
                owner[idx] = Some(tree_idx);
                let node = &self.nodes[idx];
                for child in node.gateways.iter().chain(node.browsers.iter()) {
                    stack.push(self.index[&child.to_lowercase()]);
                }
            }
        }

        let mut custom: Vec<BrowserTree> = custom_roots
            .iter()
            .map(|&idx| {
                let mut tree = BrowserTree::new(self.nodes[idx].id.clone());
                tree.root = Some(self.nodes[idx].id.clone());
                tree
            })
            .collect();

        let nodes = std::mem::take(&mut self.nodes);
        for (node, owner) in nodes.into_iter().zip(owner) {
            match owner {
                Some(tree_idx) => custom[tree_idx].nodes.push(node),
                None => self.nodes.push(node),
            }
        }
        self.rebuild_index();
        for tree in &mut custom {
            tree.rebuild_index();
        }

        debug!("tree '{}': split off {} custom trees", self.name, custom.len());
        custom
    }

    /// Fail if any parentless node besides the root exists.
    pub fn ensure_single_root(&self) -> BcResult<()> {
        let extra = self
            .nodes
            .iter()
            .find(|n| n.parent_id.is_none() && Some(n.id.as_str()) != self.root.as_deref());
        match extra {
            Some(node) => Err(BrowserCapsError::MultipleRoots {
                file: node.file.clone(),
                line: node.line,
                id: node.id.clone(),
                tree: self.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Depth-first order from the root, gateways before browsers. Sets `depth`.
    pub fn linearize(&mut self) -> Vec<LinearNode> {
        let mut order = Vec::with_capacity(self.nodes.len());
        if let Some(root) = self.root.clone() {
            self.visit(&root, 0, &mut order);
        }
        order
    }

    fn visit(&mut self, id: &str, depth: usize, order: &mut Vec<LinearNode>) {
        let Some(&idx) = self.index.get(&id.to_lowercase()) else {
            return;
        };
        let node = &mut self.nodes[idx];
        node.depth = depth;
        for reference in node.ref_gateways.iter_mut().chain(node.ref_browsers.iter_mut()) {
            reference.depth = depth;
        }
        order.push(LinearNode {
            id: node.id.clone(),
            depth,
        });

        let children: Vec<String> = node.gateways.iter().chain(node.browsers.iter()).cloned().collect();
        for child in children {
            self.visit(&child, depth + 1, order);
        }
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.key(), i))
            .collect();
    }
}

fn missing_parent(node: &BrowserDefinition, parent: &str, hooks: &dyn TreeHooks) -> BcResult<ParentResolution> {
    match node.scope {
        RuleScope::Application => Err(unresolved(node, parent)),
        RuleScope::Machine => hooks.unrecognized_parent(node, parent),
    }
}

fn unresolved(node: &BrowserDefinition, parent: &str) -> BrowserCapsError {
    BrowserCapsError::UnresolvedParent {
        file: node.file.clone(),
        line: node.line,
        id: node.id.clone(),
        parent: parent.to_string(),
    }
}
