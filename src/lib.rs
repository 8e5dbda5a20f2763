//! browsercaps - browser definition rules, capability resolution and machine keys

// Global error type
pub use self::error::{BcResult, BrowserCapsError};

// Configuration
pub use self::config::{ConfigManager, CustomConfigBuilder, GlobalConfig};

// Rule loading and normalization
pub use self::rule::{
    BrowserDefinition, BrowserTree, BrowserTreeSet, RuleCacheManager, RuleLoader, RuleParser, RuleScope,
    StrictParents, TreeHooks, TreeSetBuilder,
};

// Compilation
pub use self::compiler::{CompiledRuleSet, RuleCompiler};

// Resolution
pub use self::capabilities::{BrowserCapabilities, CapVersion};
pub use self::detector::{BrowserCapsDetector, CapabilityResolver, NoHooks, ResolverHooks};

// Machine keys
pub use self::machine_key::{
    AppIdentity, EncryptionOptions, IvMode, KeySeed, MachineKey, MachineKeyConfig,
};

// Helpers
pub use self::utils::{HeaderConverter, ValueExpression};

pub mod capabilities;
pub mod compiler;
pub mod config;
pub mod detector;
pub mod error;
pub mod machine_key;
pub mod rule;
pub mod utils;
