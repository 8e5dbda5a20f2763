//! Capability value expressions
//! `${name}` expands a captured variable, `%{name}` the current value of a capability.
//! Anything else is literal text; unknown names expand to the empty string.

use serde::{Deserialize, Serialize};

/// Lookups an expression needs while expanding
pub trait ExpressionContext {
    fn variable(&self, name: &str) -> Option<&str>;
    fn capability(&self, name: &str) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Literal(String),
    Variable(String),
    Capability(String),
}

/// Value expression, parsed once at compile time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueExpression {
    segments: Vec<Segment>,
}

impl ValueExpression {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = raw;

        while !rest.is_empty() {
            let marker = rest.find(['$', '%']);
            let Some(pos) = marker else {
                literal.push_str(rest);
                break;
            };
            literal.push_str(&rest[..pos]);
            rest = &rest[pos..];

            // `${` or `%{` followed by a closing brace; otherwise the sigil is literal
            let sigil = rest.as_bytes()[0];
            let reference = rest
                .strip_prefix(['$', '%'])
                .and_then(|r| r.strip_prefix('{'))
                .and_then(|r| r.find('}').map(|end| (&r[..end], end)));
            match reference {
                Some((name, end)) if is_name(name) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(if sigil == b'$' {
                        Segment::Variable(name.to_string())
                    } else {
                        Segment::Capability(name.to_string())
                    });
                    // sigil + '{' + name + '}'
                    rest = &rest[end + 3..];
                }
                _ => {
                    literal.push(sigil as char);
                    rest = &rest[1..];
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    /// True when no substitution is needed
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn expand(&self, context: &dyn ExpressionContext) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => out.push_str(context.variable(name).unwrap_or("")),
                Segment::Capability(name) => out.push_str(context.capability(name).unwrap_or("")),
            }
        }
        out
    }
}

fn is_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
