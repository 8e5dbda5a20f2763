//! Normalized set of trees produced from all rule files

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{BrowserDefinition, NodeKind};
use super::tree::{BrowserTree, TreeHooks};
use crate::error::BcResult;

/// Main tree, optional default-browser tree and any custom trees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrowserTreeSet {
    pub browsers: BrowserTree,
    pub defaults: Option<BrowserTree>,
    pub custom: Vec<BrowserTree>,
}

impl BrowserTreeSet {
    pub fn trees(&self) -> impl Iterator<Item = &BrowserTree> {
        std::iter::once(&self.browsers)
            .chain(self.defaults.iter())
            .chain(self.custom.iter())
    }

    pub fn node_count(&self) -> usize {
        self.trees().map(|t| t.len()).sum()
    }
}

/// Collects parsed definitions and normalizes them into a `BrowserTreeSet`.
pub struct TreeSetBuilder {
    browsers: BrowserTree,
    defaults: BrowserTree,
}

impl Default for TreeSetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeSetBuilder {
    pub fn new() -> Self {
        Self {
            browsers: BrowserTree::new("browsers"),
            defaults: BrowserTree::new("default browsers"),
        }
    }

    /// `<defaultBrowser>` entries go to the default tree, everything else to the main tree.
    pub fn add(&mut self, definition: BrowserDefinition) -> BcResult<()> {
        match definition.kind {
            NodeKind::DefaultBrowser => self.defaults.insert(definition),
            NodeKind::Browser | NodeKind::Gateway => self.browsers.insert(definition),
        }
    }

    pub fn add_all(&mut self, definitions: impl IntoIterator<Item = BrowserDefinition>) -> BcResult<()> {
        for definition in definitions {
            self.add(definition)?;
        }
        Ok(())
    }

    pub fn build(self, hooks: &dyn TreeHooks) -> BcResult<BrowserTreeSet> {
        let start = Instant::now();
        let Self {
            mut browsers,
            mut defaults,
        } = self;

        // 1. Main tree; extra roots become custom trees
        browsers.normalize(hooks)?;
        let mut custom = browsers.split_custom_trees();
        browsers.linearize();
        for tree in &mut custom {
            tree.linearize();
        }

        // 2. Default tree allows a single root only
        let defaults = if defaults.is_empty() {
            None
        } else {
            defaults.normalize(hooks)?;
            defaults.ensure_single_root()?;
            defaults.linearize();
            Some(defaults)
        };

        let set = BrowserTreeSet {
            browsers,
            defaults,
            custom,
        };
        debug!(
            "tree set built: {} nodes, {} custom trees, took {:?}",
            set.node_count(),
            set.custom.len(),
            start.elapsed()
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrowserCapsError;
    use crate::rule::model::RuleScope;
    use crate::rule::tree::StrictParents;

    fn def(id: &str, kind: NodeKind, parent: Option<&str>) -> BrowserDefinition {
        let d = BrowserDefinition::new(id, kind, RuleScope::Machine);
        match parent {
            Some(p) => d.with_parent(p),
            None => d,
        }
    }

    #[test]
    fn routes_default_browsers_to_their_own_tree() {
        let mut builder = TreeSetBuilder::new();
        builder
            .add_all(vec![
                def("Default", NodeKind::Browser, None),
                def("IE", NodeKind::Browser, Some("Default")),
                def("Default", NodeKind::DefaultBrowser, None),
                def("Wml", NodeKind::DefaultBrowser, Some("Default")),
                def("Kiosk", NodeKind::Browser, None),
            ])
            .unwrap();
        let set = builder.build(&StrictParents).unwrap();

        assert_eq!(set.browsers.len(), 2);
        let defaults = set.defaults.as_ref().unwrap();
        assert_eq!(defaults.get("wml").unwrap().depth, 1);
        assert_eq!(set.custom.len(), 1);
        assert_eq!(set.node_count(), 5);
    }

    #[test]
    fn default_tree_rejects_second_root() {
        let mut builder = TreeSetBuilder::new();
        builder.add(def("Default", NodeKind::DefaultBrowser, None)).unwrap();
        builder.add(def("Stray", NodeKind::DefaultBrowser, None)).unwrap();
        let err = builder.build(&StrictParents).unwrap_err();
        assert!(matches!(err, BrowserCapsError::MultipleRoots { ref id, .. } if id == "Stray"));
    }

    #[test]
    fn same_id_in_both_trees_is_not_a_duplicate() {
        let mut builder = TreeSetBuilder::new();
        builder.add(def("Default", NodeKind::Browser, None)).unwrap();
        assert!(builder.add(def("Default", NodeKind::DefaultBrowser, None)).is_ok());
    }
}
