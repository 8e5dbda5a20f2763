//! Capability resolver
//! Walks compiled trees for one request: identify, capture, assign, then recurse

use std::collections::HashMap;

use crate::capabilities::BrowserCapabilities;
use crate::compiler::{CompiledNode, CompiledRuleSet, CompiledTree, NodeActions};
use crate::rule::model::{CheckSource, NodeKind};
use crate::utils::{ExpressionContext, ValueExpression};

/// Variables captured along the current path
type Variables = HashMap<String, String>;

/// Extension points called after a matched node's own phases.
pub trait ResolverHooks: Send + Sync {
    /// Before the node's primary gateways
    fn process_gateways(
        &self,
        _node_id: &str,
        _headers: &HashMap<String, String>,
        _caps: &mut BrowserCapabilities,
    ) {
    }

    /// After all browsers; `matched_primary` tells whether any non-ref browser child matched
    fn process_browsers(
        &self,
        _node_id: &str,
        _matched_primary: bool,
        _headers: &HashMap<String, String>,
        _caps: &mut BrowserCapabilities,
    ) {
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ResolverHooks for NoHooks {}

struct Scope<'a> {
    variables: &'a Variables,
    caps: &'a BrowserCapabilities,
}

impl ExpressionContext for Scope<'_> {
    fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    fn capability(&self, name: &str) -> Option<&str> {
        self.caps.get(name)
    }
}

/// Capability resolver over a compiled rule set.
///
/// `headers` must be keyed by lower-cased header name.
pub struct CapabilityResolver<'a> {
    rules: &'a CompiledRuleSet,
    hooks: &'a dyn ResolverHooks,
}

impl<'a> CapabilityResolver<'a> {
    pub fn new(rules: &'a CompiledRuleSet, hooks: &'a dyn ResolverHooks) -> Self {
        Self { rules, hooks }
    }

    pub fn resolve(&self, headers: &HashMap<String, String>) -> BrowserCapabilities {
        let mut caps = BrowserCapabilities::new();

        // 1. Standard tree
        self.resolve_tree(&self.rules.browsers, headers, &mut caps);

        // 2. Nothing beyond the root matched: fall back to the default browsers
        if caps.browsers().len() <= 1 {
            if let Some(defaults) = &self.rules.defaults {
                self.resolve_tree(defaults, headers, &mut caps);
            }
        }

        // 3. Custom trees contribute on top
        for tree in &self.rules.custom {
            self.resolve_tree(tree, headers, &mut caps);
        }
        caps
    }

    /// Resolve one tree into `caps`; returns whether its root matched.
    pub fn resolve_tree(
        &self,
        tree: &CompiledTree,
        headers: &HashMap<String, String>,
        caps: &mut BrowserCapabilities,
    ) -> bool {
        match tree.root {
            Some(root) => self.process_node(tree, root, headers, caps, &Variables::new()),
            None => false,
        }
    }

    fn process_node(
        &self,
        tree: &CompiledTree,
        idx: usize,
        headers: &HashMap<String, String>,
        caps: &mut BrowserCapabilities,
        inherited: &Variables,
    ) -> bool {
        let node = &tree.nodes[idx];
        let mut variables = inherited.clone();

        // 1. Identification; any failure leaves caps untouched
        if !Self::identify(node, headers, caps, &mut variables) {
            return false;
        }

        // 2-3. Capture and assignment
        Self::apply(&node.actions, headers, caps, &mut variables);
        if node.kind != NodeKind::Gateway {
            caps.add_browser(&node.id);
        }

        // 4. Children
        for reference in &node.ref_gateways {
            Self::apply(&reference.actions, headers, caps, &mut variables.clone());
        }
        self.hooks.process_gateways(&node.id, headers, caps);
        for &child in &node.gateways {
            self.process_node(tree, child, headers, caps, &variables);
        }

        let mut matched_primary = false;
        for &child in &node.browsers {
            // every sibling is attempted
            if self.process_node(tree, child, headers, caps, &variables) {
                matched_primary = true;
            }
        }
        for reference in &node.ref_browsers {
            Self::apply(&reference.actions, headers, caps, &mut variables.clone());
        }
        self.hooks.process_browsers(&node.id, matched_primary, headers, caps);

        true
    }

    fn identify(
        node: &CompiledNode,
        headers: &HashMap<String, String>,
        caps: &BrowserCapabilities,
        variables: &mut Variables,
    ) -> bool {
        for check in &node.identification {
            let value = Self::source_value(&check.source, headers, caps);
            let passed = if check.non_match {
                !check.matcher.is_match(value)
            } else {
                check.matcher.capture_into(value, variables)
            };
            if !passed {
                return false;
            }
        }
        true
    }

    /// Capture phase then assignment phase
    fn apply(
        actions: &NodeActions,
        headers: &HashMap<String, String>,
        caps: &mut BrowserCapabilities,
        variables: &mut Variables,
    ) {
        for capture in &actions.captures {
            let value = Self::source_value(&capture.source, headers, caps);
            // a non-matching capture is not an error
            capture.matcher.capture_into(value, variables);
        }

        for (name, expression) in &actions.capabilities {
            let value = Self::expand(expression, variables, caps);
            caps.set(name, value);
        }
        for adapter in &actions.adapters {
            caps.set_adapter(&adapter.control_type, &adapter.adapter_type);
        }
        if let Some(writer) = &actions.markup_text_writer {
            caps.set_html_text_writer(writer);
        }
    }

    fn expand(expression: &ValueExpression, variables: &Variables, caps: &BrowserCapabilities) -> String {
        expression.expand(&Scope { variables, caps })
    }

    /// Missing headers and capabilities read as the empty string
    fn source_value<'v>(
        source: &CheckSource,
        headers: &'v HashMap<String, String>,
        caps: &'v BrowserCapabilities,
    ) -> &'v str {
        match source {
            CheckSource::Header(name) => headers.get(name).map(String::as_str).unwrap_or(""),
            CheckSource::Capability(name) => caps.get(name).unwrap_or(""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::rule::model::RuleScope;
    use crate::rule::parser::RuleParser;
    use crate::rule::tree::StrictParents;
    use crate::rule::tree_set::TreeSetBuilder;
    use std::sync::Mutex;

    fn compile(xml: &str) -> CompiledRuleSet {
        let defs = RuleParser::parse_str(xml, "test.browser", RuleScope::Machine).unwrap();
        let mut builder = TreeSetBuilder::new();
        builder.add_all(defs).unwrap();
        RuleCompiler::compile(&builder.build(&StrictParents).unwrap()).unwrap()
    }

    fn ua(agent: &str) -> HashMap<String, String> {
        HashMap::from([("user-agent".to_string(), agent.to_string())])
    }

    const TWO_LEVEL: &str = r#"<browsers>
    <browser id="Default">
        <capabilities>
            <capability name="browser" value="Unknown" />
            <capability name="tables" value="false" />
        </capabilities>
    </browser>
    <browser id="Mozilla" parentID="Default">
        <identification>
            <userAgent match="Mozilla" />
        </identification>
        <capabilities>
            <capability name="browser" value="Mozilla" />
            <capability name="tables" value="true" />
        </capabilities>
    </browser>
</browsers>"#;

    #[test]
    fn child_capabilities_apply_only_when_it_matches() {
        let rules = compile(TWO_LEVEL);
        let resolver = CapabilityResolver::new(&rules, &NoHooks);

        let caps = resolver.resolve(&ua("Mozilla/5.0"));
        assert_eq!(caps.browser(), Some("Mozilla"));
        assert!(caps.tables().unwrap());
        assert_eq!(caps.browsers(), &["default", "mozilla"]);

        let caps = resolver.resolve(&ua("Opera/9.0"));
        assert_eq!(caps.browser(), Some("Unknown"));
        assert!(!caps.tables().unwrap());
        assert_eq!(caps.browsers(), &["default"]);
    }

    #[test]
    fn non_match_passes_only_without_a_match() {
        let rules = compile(
            r#"<browsers>
    <browser id="Default" />
    <browser id="NotWap" parentID="Default">
        <identification>
            <header name="Accept" nonMatch="wap" />
        </identification>
        <capabilities>
            <capability name="markup" value="html" />
        </capabilities>
    </browser>
</browsers>"#,
        );
        let resolver = CapabilityResolver::new(&rules, &NoHooks);

        let html = HashMap::from([("accept".to_string(), "text/html".to_string())]);
        assert_eq!(resolver.resolve(&html).get("markup"), Some("html"));

        let wap = HashMap::from([("accept".to_string(), "text/vnd.wap.wml".to_string())]);
        assert_eq!(resolver.resolve(&wap).get("markup"), None);

        // a missing header is tested as the empty string
        assert_eq!(resolver.resolve(&HashMap::new()).get("markup"), Some("html"));
    }

    #[test]
    fn captured_variables_flow_down_not_up() {
        let rules = compile(
            r#"<browsers>
    <browser id="Default">
        <capture>
            <userAgent match="^(?'engine'\w+)/" />
        </capture>
        <capabilities>
            <capability name="engine" value="${engine}" />
            <capability name="leak" value="[${minor}]" />
        </capabilities>
    </browser>
    <browser id="Opera" parentID="Default">
        <identification>
            <userAgent match="Opera/(?'major'\d+)\.(?'minor'\d+)" />
        </identification>
        <capabilities>
            <capability name="version" value="${engine}-${major}.${minor}" />
            <capability name="browser" value="%{engine}" />
        </capabilities>
    </browser>
    <browser id="Sibling" parentID="Default">
        <identification>
            <userAgent match="Opera" />
        </identification>
        <capabilities>
            <capability name="sibling" value="[${major}]" />
        </capabilities>
    </browser>
</browsers>"#,
        );
        let caps = CapabilityResolver::new(&rules, &NoHooks).resolve(&ua("Opera/9.80 (Windows)"));

        assert_eq!(caps.version(), Some("Opera-9.80"));
        assert_eq!(caps.browser(), Some("Opera"));
        assert_eq!(caps.get("leak"), Some("[]"));
        assert_eq!(caps.get("sibling"), Some("[]"));
        assert_eq!(caps.browsers(), &["default", "opera", "sibling"]);
    }

    #[test]
    fn gateways_run_before_browsers_and_are_not_listed() {
        let rules = compile(
            r#"<browsers>
    <browser id="Default" />
    <browser id="Phone" parentID="Default">
        <identification>
            <header name="X-Device" match="." />
        </identification>
        <capabilities>
            <capability name="order" value="%{order}browser" />
        </capabilities>
    </browser>
    <gateway id="Carrier" parentID="Default">
        <identification>
            <header name="Via" match="carrier" />
        </identification>
        <capabilities>
            <capability name="order" value="gateway," />
        </capabilities>
    </gateway>
</browsers>"#,
        );
        let headers = HashMap::from([
            ("via".to_string(), "1.1 carrier".to_string()),
            ("x-device".to_string(), "nokia".to_string()),
        ]);
        let caps = CapabilityResolver::new(&rules, &NoHooks).resolve(&headers);
        assert_eq!(caps.get("order"), Some("gateway,browser"));
        assert_eq!(caps.browsers(), &["default", "phone"]);
    }

    #[test]
    fn ref_nodes_overwrite_target_values() {
        let rules = compile(
            r#"<browsers>
    <browser id="Default">
        <capabilities>
            <capability name="cookies" value="false" />
        </capabilities>
    </browser>
    <browser refID="Default">
        <capabilities>
            <capability name="cookies" value="true" />
        </capabilities>
        <controlAdapters markupTextWriterType="Html32TextWriter">
            <adapter controlType="Menu" adapterType="MenuAdapter" />
        </controlAdapters>
    </browser>
</browsers>"#,
        );
        let caps = CapabilityResolver::new(&rules, &NoHooks).resolve(&HashMap::new());
        assert!(caps.cookies().unwrap());
        assert_eq!(caps.adapters()["Menu"], "MenuAdapter");
        assert_eq!(caps.html_text_writer(), Some("Html32TextWriter"));
        assert_eq!(caps.browsers(), &["default"]);
    }

    #[test]
    fn default_tree_applies_only_for_unknown_browsers() {
        let rules = compile(
            r#"<browsers>
    <browser id="Default" />
    <browser id="IE" parentID="Default">
        <identification>
            <userAgent match="MSIE" />
        </identification>
    </browser>
    <defaultBrowser id="Default">
        <capabilities>
            <capability name="fallback" value="true" />
        </capabilities>
    </defaultBrowser>
</browsers>"#,
        );
        let resolver = CapabilityResolver::new(&rules, &NoHooks);
        assert_eq!(resolver.resolve(&ua("Mozilla/4.0 (compatible; MSIE 6.0)")).get("fallback"), None);
        assert_eq!(resolver.resolve(&ua("curl/8.0")).get("fallback"), Some("true"));
    }

    #[test]
    fn custom_trees_layer_on_top_of_the_standard_tree() {
        let mut xml = TWO_LEVEL.trim_end_matches("</browsers>").to_string();
        xml.push_str(
            r#"    <browser id="Kiosk">
        <identification>
            <userAgent match="Kiosk" />
        </identification>
        <capabilities>
            <capability name="kiosk" value="true" />
        </capabilities>
    </browser>
    <browser id="KioskBrowser" parentID="Kiosk">
        <identification>
            <userAgent match="KioskBrowser/(?'major'\d+)" />
        </identification>
        <capabilities>
            <capability name="browser" value="%{browser}Kiosk" />
            <capability name="majorversion" value="${major}" />
        </capabilities>
    </browser>
</browsers>"#,
        );
        let rules = compile(&xml);
        assert_eq!(rules.custom.len(), 1);
        let resolver = CapabilityResolver::new(&rules, &NoHooks);

        let caps = resolver.resolve(&ua("Mozilla/5.0 KioskBrowser/3"));
        assert_eq!(caps.browser(), Some("MozillaKiosk"));
        assert_eq!(caps.major_version().unwrap(), 3);
        assert!(caps.tables().unwrap());
        assert_eq!(caps.get("kiosk"), Some("true"));
        assert_eq!(caps.browsers(), &["default", "mozilla", "kiosk", "kioskbrowser"]);

        let caps = resolver.resolve(&ua("Mozilla/5.0"));
        assert_eq!(caps.browser(), Some("Mozilla"));
        assert_eq!(caps.get("kiosk"), None);
        assert_eq!(caps.browsers(), &["default", "mozilla"]);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ResolverHooks for Recorder {
        fn process_gateways(
            &self,
            node_id: &str,
            _headers: &HashMap<String, String>,
            caps: &mut BrowserCapabilities,
        ) {
            let order = caps.get("order").unwrap_or("-");
            self.0.lock().unwrap().push(format!("gateways {} {}", node_id, order));
        }

        fn process_browsers(
            &self,
            node_id: &str,
            matched_primary: bool,
            _headers: &HashMap<String, String>,
            _caps: &mut BrowserCapabilities,
        ) {
            self.0.lock().unwrap().push(format!("browsers {} {}", node_id, matched_primary));
        }
    }

    #[test]
    fn hooks_see_primary_match_flag() {
        let rules = compile(TWO_LEVEL);
        let recorder = Recorder::default();
        CapabilityResolver::new(&rules, &recorder).resolve(&ua("Opera/9.0"));
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &["gateways Default -", "browsers Default false"]
        );

        let recorder = Recorder::default();
        CapabilityResolver::new(&rules, &recorder).resolve(&ua("Mozilla/5.0"));
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[
                "gateways Default -",
                "gateways Mozilla -",
                "browsers Mozilla false",
                "browsers Default true"
            ]
        );
    }

    #[test]
    fn gateway_hook_runs_before_gateway_children() {
        let rules = compile(
            r#"<browsers>
    <browser id="Default" />
    <gateway id="Carrier" parentID="Default">
        <identification>
            <header name="Via" match="carrier" />
        </identification>
        <capabilities>
            <capability name="order" value="gateway" />
        </capabilities>
    </gateway>
</browsers>"#,
        );
        let headers = HashMap::from([("via".to_string(), "1.1 carrier".to_string())]);
        let recorder = Recorder::default();
        CapabilityResolver::new(&rules, &recorder).resolve(&headers);
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            &[
                "gateways Default -",
                "gateways Carrier gateway",
                "browsers Carrier false",
                "browsers Default false"
            ]
        );
    }
}
