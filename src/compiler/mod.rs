//! Compiler module: normalized trees to executable matchers
pub mod pattern;
pub mod compiler;

pub use self::pattern::{
    CompiledCapture, CompiledCheck, CompiledNode, CompiledRef, CompiledRuleSet, CompiledTree, Matcher, NodeActions,
};
pub use self::compiler::{CompileStats, RuleCompiler};
