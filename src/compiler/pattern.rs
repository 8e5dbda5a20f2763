//! Compiled rule model
//! Trees after regex compilation, laid out as index arenas

use std::collections::HashMap;

use regex::{Captures, Regex};

use crate::rule::model::{CheckSource, ControlAdapter, NodeKind};
use crate::utils::ValueExpression;

#[derive(Debug, Clone)]
pub enum Matcher {
    Always,   // trivially true pattern, no regex
    NonEmpty, // "." : value present and non-empty
    Regex(Regex),
}

impl Matcher {
    /// Capture groups, regex matchers only
    pub fn captures<'a>(&'a self, input: &'a str) -> Option<Captures<'a>> {
        match self {
            Matcher::Regex(regex) => regex.captures(input),
            _ => None,
        }
    }

    pub fn is_match(&self, input: &str) -> bool {
        match self {
            Matcher::Always => true,
            Matcher::NonEmpty => !input.is_empty(),
            Matcher::Regex(regex) => regex.is_match(input),
        }
    }

    pub fn describe(&self) -> &str {
        match self {
            Matcher::Always => "always",
            Matcher::NonEmpty => "non_empty",
            Matcher::Regex(r) => r.as_str(),
        }
    }

    /// Match `input` and store its groups into `variables`, named groups under
    /// their name and unnamed ones under their index. Returns whether it matched.
    pub fn capture_into(&self, input: &str, variables: &mut HashMap<String, String>) -> bool {
        let Matcher::Regex(regex) = self else {
            return self.is_match(input);
        };
        let Some(captures) = regex.captures(input) else {
            return false;
        };
        // groups that did not participate are stored as empty
        for (i, name) in regex.capture_names().enumerate() {
            let key = name.map_or_else(|| i.to_string(), str::to_string);
            let value = captures.get(i).map_or("", |m| m.as_str());
            variables.insert(key, value.to_string());
        }
        true
    }
}

/// Identification check
#[derive(Debug, Clone)]
pub struct CompiledCheck {
    pub source: CheckSource,
    pub matcher: Matcher,
    pub non_match: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledCapture {
    pub source: CheckSource,
    pub matcher: Matcher,
}

/// Capture and assignment phases; shared by nodes and ref nodes
#[derive(Debug, Clone, Default)]
pub struct NodeActions {
    pub captures: Vec<CompiledCapture>,
    pub capabilities: Vec<(String, ValueExpression)>,
    pub adapters: Vec<ControlAdapter>,
    pub markup_text_writer: Option<String>,
}

/// Ref node merged into a target
#[derive(Debug, Clone)]
pub struct CompiledRef {
    pub id: String,
    pub kind: NodeKind,
    pub actions: NodeActions,
}

#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub id: String,
    pub kind: NodeKind,
    pub depth: usize,
    pub is_device_node: bool,
    /// Header checks first, then capability checks
    pub identification: Vec<CompiledCheck>,
    pub actions: NodeActions,
    pub gateways: Vec<usize>,
    pub browsers: Vec<usize>,
    pub ref_gateways: Vec<CompiledRef>,
    pub ref_browsers: Vec<CompiledRef>,
}

/// Arena of one tree; nodes are stored in linearized order
#[derive(Debug, Clone, Default)]
pub struct CompiledTree {
    pub name: String,
    pub nodes: Vec<CompiledNode>,
    pub root: Option<usize>,
}

impl CompiledTree {
    pub fn root(&self) -> Option<&CompiledNode> {
        self.root.map(|i| &self.nodes[i])
    }

    pub fn find(&self, id: &str) -> Option<&CompiledNode> {
        self.nodes.iter().find(|n| n.id.eq_ignore_ascii_case(id))
    }
}

/// Compiled rule set
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleSet {
    pub browsers: CompiledTree,
    pub defaults: Option<CompiledTree>,
    pub custom: Vec<CompiledTree>,
}

impl CompiledRuleSet {
    pub fn node_count(&self) -> usize {
        self.browsers.nodes.len()
            + self.defaults.as_ref().map_or(0, |t| t.nodes.len())
            + self.custom.iter().map(|t| t.nodes.len()).sum::<usize>()
    }
}
