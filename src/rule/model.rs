//! Browser definition data model
//! Pure data, serializable so normalized trees can be cached

use serde::{Deserialize, Serialize};

/// Header consulted by `<userAgent>` checks.
pub const USER_AGENT_HEADER: &str = "User-Agent";

/// Id of the standard tree root.
pub const DEFAULT_ROOT_ID: &str = "Default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Browser,
    Gateway,
    DefaultBrowser,
}

impl NodeKind {
    /// XML element name
    pub fn element_name(&self) -> &'static str {
        match self {
            NodeKind::Browser => "browser",
            NodeKind::Gateway => "gateway",
            NodeKind::DefaultBrowser => "defaultBrowser",
        }
    }
}

/// Where a rule file came from. Application rules must resolve every parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleScope {
    Machine,
    Application,
}

/// Value a check reads: a request header or an already assigned capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckSource {
    Header(String),
    Capability(String),
}

impl CheckSource {
    pub fn name(&self) -> &str {
        match self {
            CheckSource::Header(name) | CheckSource::Capability(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationCheck {
    pub source: CheckSource,
    pub pattern: String,
    /// Passes when the pattern does NOT match.
    pub non_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureCheck {
    pub source: CheckSource,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAdapter {
    pub control_type: String,
    pub adapter_type: String,
}

/// One `<browser>`, `<gateway>` or `<defaultBrowser>` entry.
///
/// Gateways share this type and are told apart by `kind`. Ref nodes carry
/// `ref_id` and an `id` equal to their target; they never enter the id map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserDefinition {
    pub id: String,
    pub parent_id: Option<String>,
    pub ref_id: Option<String>,
    pub kind: NodeKind,
    pub identification: Vec<IdentificationCheck>,
    pub captures: Vec<CaptureCheck>,
    /// Capability name -> value expression, in declaration order
    pub capabilities: Vec<(String, String)>,
    pub adapters: Vec<ControlAdapter>,
    pub markup_text_writer: Option<String>,
    pub depth: usize,
    pub is_device_node: bool,
    pub scope: RuleScope,
    pub file: String,
    pub line: u32,

    // Filled in by normalization
    #[serde(default)]
    pub gateways: Vec<String>,
    #[serde(default)]
    pub browsers: Vec<String>,
    #[serde(default)]
    pub ref_gateways: Vec<BrowserDefinition>,
    #[serde(default)]
    pub ref_browsers: Vec<BrowserDefinition>,
}

impl BrowserDefinition {
    pub fn new(id: impl Into<String>, kind: NodeKind, scope: RuleScope) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            ref_id: None,
            kind,
            identification: Vec::new(),
            captures: Vec::new(),
            capabilities: Vec::new(),
            adapters: Vec::new(),
            markup_text_writer: None,
            depth: 0,
            is_device_node: kind != NodeKind::Gateway,
            scope,
            file: String::new(),
            line: 0,
            gateways: Vec::new(),
            browsers: Vec::new(),
            ref_gateways: Vec::new(),
            ref_browsers: Vec::new(),
        }
    }

    pub fn is_ref(&self) -> bool {
        self.ref_id.is_some()
    }

    pub fn is_gateway(&self) -> bool {
        self.kind == NodeKind::Gateway
    }

    /// Name used for lookups; ids are case-insensitive.
    pub fn key(&self) -> String {
        self.id.to_lowercase()
    }

    /// Declared capability value, last declaration wins.
    pub fn capability(&self, name: &str) -> Option<&str> {
        self.capabilities
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }
}
