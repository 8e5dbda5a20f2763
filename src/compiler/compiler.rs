//! Rule compiler
//! Turns normalized trees into compiled arenas; patterns are compiled exactly once

use std::time::Instant;

use regex::Regex;
use tracing::debug;

use super::pattern::{
    CompiledCapture, CompiledCheck, CompiledNode, CompiledRef, CompiledRuleSet, CompiledTree, Matcher, NodeActions,
};
use crate::error::{BcResult, BrowserCapsError};
use crate::rule::model::{BrowserDefinition, CheckSource};
use crate::rule::tree::BrowserTree;
use crate::rule::tree_set::BrowserTreeSet;
use crate::utils::ValueExpression;

/// Rule compiler
pub struct RuleCompiler;

impl RuleCompiler {
    /// Compile every tree of the set
    pub fn compile(trees: &BrowserTreeSet) -> BcResult<CompiledRuleSet> {
        let start = Instant::now();
        let mut stats = CompileStats::default();

        // 1. Main tree
        let browsers = Self::compile_tree(&trees.browsers, &mut stats)?;

        // 2. Default and custom trees
        let defaults = trees
            .defaults
            .as_ref()
            .map(|tree| Self::compile_tree(tree, &mut stats))
            .transpose()?;
        let custom = trees
            .custom
            .iter()
            .map(|tree| Self::compile_tree(tree, &mut stats))
            .collect::<BcResult<Vec<_>>>()?;

        debug!("rule compilation finished in {:?}", start.elapsed());
        debug!(
            "compile stats: {} nodes, {} regex, {} presence, {} dropped always-true, {} expressions",
            stats.nodes, stats.regex_count, stats.non_empty_count, stats.dropped_count, stats.expression_count
        );

        Ok(CompiledRuleSet {
            browsers,
            defaults,
            custom,
        })
    }

    /// Compile one tree into an arena in depth-first order
    pub fn compile_tree(tree: &BrowserTree, stats: &mut CompileStats) -> BcResult<CompiledTree> {
        let mut nodes = Vec::with_capacity(tree.len());
        let root = match tree.root() {
            Some(root) => Some(Self::compile_subtree(tree, root, &mut nodes, stats)?),
            None => None,
        };
        Ok(CompiledTree {
            name: tree.name().to_string(),
            nodes,
            root,
        })
    }

    fn compile_subtree(
        tree: &BrowserTree,
        definition: &BrowserDefinition,
        nodes: &mut Vec<CompiledNode>,
        stats: &mut CompileStats,
    ) -> BcResult<usize> {
        let idx = nodes.len();
        nodes.push(Self::compile_node(definition, stats)?);

        for child in definition.gateways.iter().filter_map(|id| tree.get(id)) {
            let child_idx = Self::compile_subtree(tree, child, nodes, stats)?;
            nodes[idx].gateways.push(child_idx);
        }
        for child in definition.browsers.iter().filter_map(|id| tree.get(id)) {
            let child_idx = Self::compile_subtree(tree, child, nodes, stats)?;
            nodes[idx].browsers.push(child_idx);
        }
        Ok(idx)
    }

    fn compile_node(definition: &BrowserDefinition, stats: &mut CompileStats) -> BcResult<CompiledNode> {
        stats.nodes += 1;

        // Header checks run before capability checks; declaration order is kept within each group
        let (headers, capabilities): (Vec<_>, Vec<_>) = definition
            .identification
            .iter()
            .partition(|check| matches!(check.source, CheckSource::Header(_)));

        let mut identification = Vec::with_capacity(definition.identification.len());
        for check in headers.into_iter().chain(capabilities) {
            let matcher = Self::compile_matcher(&definition.id, &check.pattern, stats)?;
            if matches!(matcher, Matcher::Always) && !check.non_match {
                stats.dropped_count += 1;
                continue;
            }
            identification.push(CompiledCheck {
                source: lookup_source(&check.source),
                matcher,
                non_match: check.non_match,
            });
        }

        Ok(CompiledNode {
            id: definition.id.clone(),
            kind: definition.kind,
            depth: definition.depth,
            is_device_node: definition.is_device_node,
            identification,
            actions: Self::compile_actions(definition, stats)?,
            gateways: Vec::new(),
            browsers: Vec::new(),
            ref_gateways: Self::compile_refs(&definition.ref_gateways, stats)?,
            ref_browsers: Self::compile_refs(&definition.ref_browsers, stats)?,
        })
    }

    fn compile_refs(refs: &[BrowserDefinition], stats: &mut CompileStats) -> BcResult<Vec<CompiledRef>> {
        refs.iter()
            .map(|reference| {
                Ok(CompiledRef {
                    id: reference.id.clone(),
                    kind: reference.kind,
                    actions: Self::compile_actions(reference, stats)?,
                })
            })
            .collect()
    }

    fn compile_actions(definition: &BrowserDefinition, stats: &mut CompileStats) -> BcResult<NodeActions> {
        let mut captures = Vec::with_capacity(definition.captures.len());
        for capture in &definition.captures {
            let matcher = Self::compile_matcher(&definition.id, &capture.pattern, stats)?;
            // only regexes can produce variables
            if !matches!(matcher, Matcher::Regex(_)) {
                stats.dropped_count += 1;
                continue;
            }
            captures.push(CompiledCapture {
                source: lookup_source(&capture.source),
                matcher,
            });
        }

        let capabilities = definition
            .capabilities
            .iter()
            .map(|(name, value)| {
                let expression = ValueExpression::parse(value);
                if !expression.is_literal() {
                    stats.expression_count += 1;
                }
                (name.clone(), expression)
            })
            .collect();

        Ok(NodeActions {
            captures,
            capabilities,
            adapters: definition.adapters.clone(),
            markup_text_writer: definition.markup_text_writer.clone(),
        })
    }

    /// Pick the cheapest matcher for a pattern.
    ///
    /// Patterns use the `regex` crate dialect after group renaming. Look-around
    /// and backreferences are not supported and fail with `RegexCompile`.
    pub fn compile_matcher(id: &str, pattern: &str, stats: &mut CompileStats) -> BcResult<Matcher> {
        match pattern {
            "" | ".*" | "^.*$" => Ok(Matcher::Always),
            "." => {
                stats.non_empty_count += 1;
                Ok(Matcher::NonEmpty)
            }
            _ => {
                let regex = Regex::new(&Self::normalize_pattern(pattern)).map_err(|source| {
                    BrowserCapsError::RegexCompile {
                        id: id.to_string(),
                        pattern: pattern.to_string(),
                        source,
                    }
                })?;
                stats.regex_count += 1;
                Ok(Matcher::Regex(regex))
            }
        }
    }

    /// Rewrite `(?'name'...)` and `(?<name>...)` groups to `(?P<name>...)`.
    /// Escapes and character classes are copied untouched.
    pub fn normalize_pattern(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + 8);
        let mut in_class = false;
        let mut i = 0;

        while let Some(c) = raw[i..].chars().next() {
            match c {
                '\\' => {
                    out.push(c);
                    i += 1;
                    if let Some(escaped) = raw[i..].chars().next() {
                        out.push(escaped);
                        i += escaped.len_utf8();
                    }
                    continue;
                }
                '[' if !in_class => in_class = true,
                ']' if in_class => in_class = false,
                '(' if !in_class && raw[i..].starts_with("(?") => {
                    if let Some((name, consumed)) = group_name(&raw[i + 2..]) {
                        out.push_str("(?P<");
                        out.push_str(name);
                        out.push('>');
                        i += 2 + consumed;
                        continue;
                    }
                }
                _ => {}
            }
            out.push(c);
            i += c.len_utf8();
        }
        out
    }
}

/// Header names are matched against lower-cased request headers
fn lookup_source(source: &CheckSource) -> CheckSource {
    match source {
        CheckSource::Header(name) => CheckSource::Header(name.to_lowercase()),
        CheckSource::Capability(name) => CheckSource::Capability(name.clone()),
    }
}

/// `'name'` or `<name>` at the start of `s`: the name and the bytes consumed.
/// Lookbehinds (`<=`, `<!`) and balancing groups do not qualify.
fn group_name(s: &str) -> Option<(&str, usize)> {
    let close = match s.chars().next()? {
        '\'' => '\'',
        '<' => '>',
        _ => return None,
    };
    let body = &s[1..];
    let end = body.find(close)?;
    let name = &body[..end];
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some((name, end + 2))
}

/// Compilation statistics
#[derive(Debug, Clone, Default)]
pub struct CompileStats {
    pub nodes: usize,
    pub regex_count: usize,
    pub non_empty_count: usize,
    pub dropped_count: usize,
    pub expression_count: usize,
}
