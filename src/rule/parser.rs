//! Rule file parser
//! Turns one `<browsers>` XML document into browser definitions

use std::path::Path;

use roxmltree::{Document, Node};

use super::model::{
    BrowserDefinition, CaptureCheck, CheckSource, ControlAdapter, IdentificationCheck, NodeKind,
    RuleScope, USER_AGENT_HEADER,
};
use crate::error::{BcResult, BrowserCapsError};

const ROOT_ELEMENT: &str = "browsers";

/// Rule file parser
pub struct RuleParser;

impl RuleParser {
    /// Parse a rule file from disk
    pub fn parse_file(path: &Path, scope: RuleScope) -> BcResult<Vec<BrowserDefinition>> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content, &path.display().to_string(), scope)
    }

    /// Parse rule file content; `file` is only used to tag errors and nodes.
    pub fn parse_str(content: &str, file: &str, scope: RuleScope) -> BcResult<Vec<BrowserDefinition>> {
        let doc = Document::parse(content)
            .map_err(|e| BrowserCapsError::syntax(file, e.pos().row, e.to_string()))?;

        let root = doc.root_element();
        if root.tag_name().name() != ROOT_ELEMENT {
            return Err(BrowserCapsError::syntax(
                file,
                line_of(&doc, root),
                format!(
                    "root element must be <{}>, found <{}>",
                    ROOT_ELEMENT,
                    root.tag_name().name()
                ),
            ));
        }

        let mut definitions = Vec::new();
        for child in root.children().filter(|n| n.is_element()) {
            let kind = match child.tag_name().name() {
                "browser" => NodeKind::Browser,
                "gateway" => NodeKind::Gateway,
                "defaultBrowser" => NodeKind::DefaultBrowser,
                other => {
                    return Err(BrowserCapsError::syntax(
                        file,
                        line_of(&doc, child),
                        format!("unrecognized element <{}>", other),
                    ));
                }
            };
            definitions.push(Self::parse_node(&doc, child, kind, file, scope)?);
        }

        Ok(definitions)
    }

    fn parse_node(
        doc: &Document,
        node: Node,
        kind: NodeKind,
        file: &str,
        scope: RuleScope,
    ) -> BcResult<BrowserDefinition> {
        let line = line_of(doc, node);
        let element = kind.element_name();
        check_attributes(doc, node, &["id", "parentID", "refID"], file)?;

        let id = node.attribute("id");
        let parent_id = node.attribute("parentID");
        let ref_id = node.attribute("refID");

        if ref_id.is_some() && (id.is_some() || parent_id.is_some()) {
            return Err(BrowserCapsError::syntax(
                file,
                line,
                format!("<{}> with 'refID' cannot also declare 'id' or 'parentID'", element),
            ));
        }
        let name = match id.or(ref_id) {
            Some(name) if !name.trim().is_empty() => name.trim(),
            Some(_) => {
                return Err(BrowserCapsError::syntax(file, line, format!("<{}> has an empty id", element)));
            }
            None => {
                return Err(BrowserCapsError::syntax(
                    file,
                    line,
                    format!("<{}> requires an 'id' or 'refID' attribute", element),
                ));
            }
        };

        let mut definition = BrowserDefinition::new(name, kind, scope).with_location(file, line);
        definition.parent_id = parent_id.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        definition.ref_id = ref_id.map(|r| r.trim().to_string());

        for child in node.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "identification" => Self::parse_identification(doc, child, file, &mut definition)?,
                "capture" => Self::parse_capture(doc, child, file, &mut definition)?,
                "capabilities" => Self::parse_capabilities(doc, child, file, &mut definition)?,
                "controlAdapters" => Self::parse_adapters(doc, child, file, &mut definition)?,
                "sampleHeaders" => {}
                other => {
                    return Err(BrowserCapsError::syntax(
                        file,
                        line_of(doc, child),
                        format!("unrecognized element <{}> in <{}>", other, element),
                    ));
                }
            }
        }

        if definition.is_ref() && !definition.identification.is_empty() {
            return Err(BrowserCapsError::syntax(
                file,
                line,
                format!("<identification> is not allowed on ref node '{}'", definition.id),
            ));
        }

        Ok(definition)
    }

    fn parse_identification(
        doc: &Document,
        node: Node,
        file: &str,
        definition: &mut BrowserDefinition,
    ) -> BcResult<()> {
        check_attributes(doc, node, &[], file)?;
        for child in node.children().filter(|n| n.is_element()) {
            let line = line_of(doc, child);
            let source = check_source(doc, child, file, &["match", "nonMatch"])?;
            let (pattern, non_match) = match (child.attribute("match"), child.attribute("nonMatch")) {
                (Some(pattern), None) => (pattern, false),
                (None, Some(pattern)) => (pattern, true),
                _ => {
                    return Err(BrowserCapsError::syntax(
                        file,
                        line,
                        format!("<{}> needs exactly one of 'match' or 'nonMatch'", child.tag_name().name()),
                    ));
                }
            };
            definition.identification.push(IdentificationCheck {
                source,
                pattern: pattern.to_string(),
                non_match,
            });
        }
        Ok(())
    }

    fn parse_capture(
        doc: &Document,
        node: Node,
        file: &str,
        definition: &mut BrowserDefinition,
    ) -> BcResult<()> {
        check_attributes(doc, node, &[], file)?;
        for child in node.children().filter(|n| n.is_element()) {
            let source = check_source(doc, child, file, &["match"])?;
            let pattern = required_attribute(doc, child, "match", file)?;
            definition.captures.push(CaptureCheck {
                source,
                pattern: pattern.to_string(),
            });
        }
        Ok(())
    }

    fn parse_capabilities(
        doc: &Document,
        node: Node,
        file: &str,
        definition: &mut BrowserDefinition,
    ) -> BcResult<()> {
        check_attributes(doc, node, &[], file)?;
        for child in node.children().filter(|n| n.is_element()) {
            expect_element(doc, child, "capability", file)?;
            check_attributes(doc, child, &["name", "value"], file)?;
            let name = required_attribute(doc, child, "name", file)?;
            let value = required_attribute(doc, child, "value", file)?;
            definition.capabilities.push((name.to_string(), value.to_string()));
        }
        Ok(())
    }

    fn parse_adapters(
        doc: &Document,
        node: Node,
        file: &str,
        definition: &mut BrowserDefinition,
    ) -> BcResult<()> {
        check_attributes(doc, node, &["markupTextWriterType"], file)?;
        if let Some(writer) = node.attribute("markupTextWriterType") {
            definition.markup_text_writer = Some(writer.to_string());
        }
        for child in node.children().filter(|n| n.is_element()) {
            expect_element(doc, child, "adapter", file)?;
            check_attributes(doc, child, &["controlType", "adapterType"], file)?;
            definition.adapters.push(ControlAdapter {
                control_type: required_attribute(doc, child, "controlType", file)?.to_string(),
                adapter_type: required_attribute(doc, child, "adapterType", file)?.to_string(),
            });
        }
        Ok(())
    }
}

/// Resolve `<userAgent>`, `<header name>` or `<capability name>` into a check source.
fn check_source(doc: &Document, node: Node, file: &str, pattern_attrs: &[&str]) -> BcResult<CheckSource> {
    let mut allowed: Vec<&str> = pattern_attrs.to_vec();
    match node.tag_name().name() {
        "userAgent" => {
            check_attributes(doc, node, &allowed, file)?;
            Ok(CheckSource::Header(USER_AGENT_HEADER.to_string()))
        }
        "header" => {
            allowed.push("name");
            check_attributes(doc, node, &allowed, file)?;
            Ok(CheckSource::Header(required_attribute(doc, node, "name", file)?.to_string()))
        }
        "capability" => {
            allowed.push("name");
            check_attributes(doc, node, &allowed, file)?;
            Ok(CheckSource::Capability(required_attribute(doc, node, "name", file)?.to_string()))
        }
        other => Err(BrowserCapsError::syntax(
            file,
            line_of(doc, node),
            format!("unrecognized element <{}>", other),
        )),
    }
}

fn expect_element(doc: &Document, node: Node, expected: &str, file: &str) -> BcResult<()> {
    if node.tag_name().name() == expected {
        Ok(())
    } else {
        Err(BrowserCapsError::syntax(
            file,
            line_of(doc, node),
            format!("unrecognized element <{}>, expected <{}>", node.tag_name().name(), expected),
        ))
    }
}

fn check_attributes(doc: &Document, node: Node, allowed: &[&str], file: &str) -> BcResult<()> {
    for attr in node.attributes() {
        // namespace declarations are not attributes in roxmltree, only plain names reach here
        if !allowed.contains(&attr.name()) {
            return Err(BrowserCapsError::syntax(
                file,
                line_of(doc, node),
                format!(
                    "unrecognized attribute '{}' on <{}>",
                    attr.name(),
                    node.tag_name().name()
                ),
            ));
        }
    }
    Ok(())
}

fn required_attribute<'a>(doc: &Document, node: Node<'a, '_>, name: &str, file: &str) -> BcResult<&'a str> {
    node.attribute(name).ok_or_else(|| {
        BrowserCapsError::syntax(
            file,
            line_of(doc, node),
            format!("<{}> requires a '{}' attribute", node.tag_name().name(), name),
        )
    })
}

fn line_of(doc: &Document, node: Node) -> u32 {
    doc.text_pos_at(node.range().start).row
}
