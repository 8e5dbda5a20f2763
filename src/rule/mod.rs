//! Rule module: data model, XML parsing, tree normalization, loading and caching
pub mod model;
pub mod parser;
pub mod tree;
pub mod tree_set;
pub mod cache;
pub mod loader;

pub use self::model::{
    BrowserDefinition, CaptureCheck, CheckSource, ControlAdapter, IdentificationCheck, NodeKind, RuleScope,
};
pub use self::parser::RuleParser;
pub use self::tree::{BrowserTree, LinearNode, ParentResolution, StrictParents, TreeHooks};
pub use self::tree_set::{BrowserTreeSet, TreeSetBuilder};
pub use self::loader::RuleLoader;
pub use self::cache::{RuleCacheManager, RuleFingerprint};
