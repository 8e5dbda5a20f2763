//! Detector facade: owns the compiled rules and resolves requests against them
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use http::HeaderMap;
use tracing::debug;

use super::resolver::{CapabilityResolver, NoHooks, ResolverHooks};
use crate::capabilities::BrowserCapabilities;
use crate::compiler::{CompiledRuleSet, RuleCompiler};
use crate::config::GlobalConfig;
use crate::error::BcResult;
use crate::rule::model::{RuleScope, USER_AGENT_HEADER};
use crate::rule::parser::RuleParser;
use crate::rule::tree::{StrictParents, TreeHooks};
use crate::rule::tree_set::{BrowserTreeSet, TreeSetBuilder};
use crate::rule::RuleLoader;
use crate::utils::HeaderConverter;

/// Browser capability detector
#[derive(Clone)]
pub struct BrowserCapsDetector {
    rules: Arc<CompiledRuleSet>,
    hooks: Arc<dyn ResolverHooks>,
}

impl fmt::Debug for BrowserCapsDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserCapsDetector")
            .field("nodes", &self.rules.node_count())
            .field("custom_trees", &self.rules.custom.len())
            .finish()
    }
}

impl BrowserCapsDetector {
    /// Load and compile the configured rule directories
    pub fn new(config: GlobalConfig) -> BcResult<Self> {
        Self::with_hooks(config, &StrictParents, Arc::new(NoHooks))
    }

    pub fn with_hooks(
        config: GlobalConfig,
        tree_hooks: &dyn TreeHooks,
        hooks: Arc<dyn ResolverHooks>,
    ) -> BcResult<Self> {
        // 1. Load the normalized trees
        let trees = RuleLoader::load_with_hooks(&config, tree_hooks)?;

        // 2. Compile
        let rules = RuleCompiler::compile(&trees)?;

        Ok(Self {
            rules: Arc::new(rules),
            hooks,
        })
    }

    #[cfg(feature = "async-io")]
    pub async fn new_async(config: GlobalConfig) -> BcResult<Self> {
        let trees = RuleLoader::load_async(config).await?;
        Self::from_tree_set(&trees)
    }

    pub fn from_tree_set(trees: &BrowserTreeSet) -> BcResult<Self> {
        Ok(Self {
            rules: Arc::new(RuleCompiler::compile(trees)?),
            hooks: Arc::new(NoHooks),
        })
    }

    /// Build from in-memory rule documents, given as `(file name, content)` pairs.
    pub fn from_documents(documents: &[(&str, &str)]) -> BcResult<Self> {
        let mut builder = TreeSetBuilder::new();
        for (file, content) in documents {
            builder.add_all(RuleParser::parse_str(content, file, RuleScope::Machine)?)?;
        }
        Self::from_tree_set(&builder.build(&StrictParents)?)
    }

    /// Replace the resolver hooks
    pub fn hooks(mut self, hooks: Arc<dyn ResolverHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn rules(&self) -> &CompiledRuleSet {
        &self.rules
    }

    /// Resolve from single-valued headers; names are matched case-insensitively.
    pub fn resolve(&self, headers: &HashMap<String, String>) -> BrowserCapabilities {
        let start = Instant::now();
        let headers = HeaderConverter::normalize(headers);
        let caps = CapabilityResolver::new(&self.rules, self.hooks.as_ref()).resolve(&headers);
        debug!(
            "resolved {:?} ({} capabilities) in {:?}",
            caps.id(),
            caps.len(),
            start.elapsed()
        );
        caps
    }

    pub fn resolve_multi(&self, headers: &HashMap<String, Vec<String>>) -> BrowserCapabilities {
        self.resolve(&HeaderConverter::to_single_value(headers))
    }

    pub fn resolve_header_map(&self, headers: &HeaderMap) -> BrowserCapabilities {
        self.resolve_multi(&HeaderConverter::to_hashmap(headers))
    }

    pub fn resolve_user_agent(&self, user_agent: &str) -> BrowserCapabilities {
        let headers = HashMap::from([(USER_AGENT_HEADER.to_string(), user_agent.to_string())]);
        self.resolve(&headers)
    }
}
