//! XPath-addressed lookups and substitutions on EPP documents.
//!
//! Only the small path subset EPP probing needs is supported:
//! `//prefix:local` followed by any number of predicates of the form
//! `[.='v']` or `[@attr op 'v']`, where `op` is one of
//! `=`, `!=`, `<`, `<=`, `>`, `>=`.

use crate::error::ProberError;
use roxmltree::{Document, Node};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;

pub const EPP_NS: &str = "urn:ietf:params:xml:ns:epp-1.0";
pub const DOMAIN_NS: &str = "urn:ietf:params:xml:ns:domain-1.0";
pub const LAUNCH_NS: &str = "urn:ietf:params:xml:ns:launch-1.0";

/// Resolve one of the known namespace prefixes.
pub fn namespace_for_prefix(prefix: &str) -> Option<&'static str> {
    match prefix {
        "eppns" => Some(EPP_NS),
        "domainns" => Some(DOMAIN_NS),
        "launchns" => Some(LAUNCH_NS),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Text(String),
    Attribute {
        name: String,
        op: CompareOp,
        value: String,
    },
}

/// A parsed element selector.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    raw: String,
    namespace: &'static str,
    local: String,
    predicates: Vec<Predicate>,
}

impl Selector {
    /// Parse a selector expression.
    ///
    /// A bad expression is a prober defect, so errors are internal.
    pub fn parse(expr: &str) -> Result<Self, ProberError> {
        let bad = |why: &str| ProberError::internal(format!("Invalid selector '{}': {}", expr, why));

        let rest = expr
            .trim()
            .strip_prefix("//")
            .ok_or_else(|| bad("must start with //"))?;

        let name_end = rest.find('[').unwrap_or(rest.len());
        let (qname, mut rest) = rest.split_at(name_end);
        let (prefix, local) = qname
            .split_once(':')
            .ok_or_else(|| bad("element name needs a namespace prefix"))?;
        let namespace =
            namespace_for_prefix(prefix).ok_or_else(|| bad("unknown namespace prefix"))?;
        if local.is_empty() {
            return Err(bad("empty element name"));
        }

        let mut predicates = Vec::new();
        while !rest.is_empty() {
            let inner_end = rest.find(']').ok_or_else(|| bad("unterminated predicate"))?;
            let inner = rest
                .get(1..inner_end)
                .filter(|_| rest.starts_with('['))
                .ok_or_else(|| bad("expected '['"))?;
            predicates.push(parse_predicate(inner.trim()).ok_or_else(|| bad("bad predicate"))?);
            rest = &rest[inner_end + 1..];
        }

        Ok(Self {
            raw: expr.trim().to_string(),
            namespace,
            local: local.to_string(),
            predicates,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// First element in document order matching this selector.
    pub fn find<'a, 'input>(&self, doc: &'a Document<'input>) -> Option<Node<'a, 'input>> {
        doc.descendants().find(|node| self.accepts(node))
    }

    /// Whether any element in the document matches.
    pub fn matches(&self, doc: &Document) -> bool {
        self.find(doc).is_some()
    }

    fn accepts(&self, node: &Node) -> bool {
        if !node.is_element() {
            return false;
        }
        let tag = node.tag_name();
        if tag.namespace() != Some(self.namespace) || tag.name() != self.local {
            return false;
        }

        self.predicates.iter().all(|predicate| match predicate {
            Predicate::Text(expected) => text_content(node).trim() == expected,
            Predicate::Attribute { name, op, value } => node
                .attribute(name.as_str())
                .map(|actual| op.accepts(compare_values(actual.trim(), value)))
                .unwrap_or(false),
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_predicate(inner: &str) -> Option<Predicate> {
    if let Some(rest) = inner.strip_prefix('.') {
        let value = rest.trim_start().strip_prefix('=')?;
        return Some(Predicate::Text(unquote(value.trim())?));
    }

    let rest = inner.strip_prefix('@')?;
    let op_start = rest.find(|c: char| matches!(c, '=' | '!' | '<' | '>'))?;
    let name = rest[..op_start].trim();
    let rest = &rest[op_start..];

    let (op, value) = if let Some(v) = rest.strip_prefix("!=") {
        (CompareOp::Ne, v)
    } else if let Some(v) = rest.strip_prefix("<=") {
        (CompareOp::Le, v)
    } else if let Some(v) = rest.strip_prefix(">=") {
        (CompareOp::Ge, v)
    } else if let Some(v) = rest.strip_prefix('=') {
        (CompareOp::Eq, v)
    } else if let Some(v) = rest.strip_prefix('<') {
        (CompareOp::Lt, v)
    } else if let Some(v) = rest.strip_prefix('>') {
        (CompareOp::Gt, v)
    } else {
        return None;
    };

    if name.is_empty() {
        return None;
    }

    Some(Predicate::Attribute {
        name: name.to_string(),
        op,
        value: unquote(value.trim())?,
    })
}

fn unquote(value: &str) -> Option<String> {
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = value.strip_prefix(quote)?.strip_suffix(quote)?;
    Some(inner.to_string())
}

/// Numeric comparison when both sides are numbers, string comparison otherwise.
fn compare_values(actual: &str, expected: &str) -> Ordering {
    match (actual.parse::<f64>(), expected.parse::<f64>()) {
        (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.cmp(expected),
    }
}

/// Concatenated text of an element and its descendants.
pub fn text_content(node: &Node) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Text of the first element matching `selector`, trimmed.
pub fn element_value(doc: &Document, selector: &Selector) -> Option<String> {
    selector
        .find(doc)
        .map(|node| text_content(&node).trim().to_string())
}

/// Escape text for use as XML element content.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace the text content of each addressed element in `template`.
///
/// Every selector must match at least one element; the first match is
/// rewritten. Any element children of the target are replaced along with
/// its text.
pub fn render_template(
    template: &str,
    replacements: &[(Selector, String)],
) -> Result<String, ProberError> {
    let doc = Document::parse(template)
        .map_err(|e| ProberError::internal(format!("Malformed EPP template: {}", e)))?;

    let mut edits: Vec<(Range<usize>, String)> = Vec::with_capacity(replacements.len());
    for (selector, value) in replacements {
        let node = selector.find(&doc).ok_or_else(|| {
            ProberError::internal(format!("Template has no placeholder for '{}'", selector))
        })?;
        edits.push(content_edit(template, &node, &escape(value))?);
    }

    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for pair in edits.windows(2) {
        if pair[1].0.end > pair[0].0.start {
            return Err(ProberError::internal(
                "Template placeholders overlap each other",
            ));
        }
    }

    let mut rendered = template.to_string();
    for (range, text) in edits {
        rendered.replace_range(range, &text);
    }

    Document::parse(&rendered)
        .map_err(|e| ProberError::internal(format!("Rendered EPP document is invalid: {}", e)))?;

    Ok(rendered)
}

/// Compute the byte range holding an element's content and its replacement.
fn content_edit(
    source: &str,
    node: &Node,
    value: &str,
) -> Result<(Range<usize>, String), ProberError> {
    if let (Some(first), Some(last)) = (node.first_child(), node.last_child()) {
        return Ok((first.range().start..last.range().end, value.to_string()));
    }

    let range = node.range();
    let raw = source
        .get(range.clone())
        .ok_or_else(|| ProberError::internal("Placeholder range is outside the template"))?;
    let qname: String = raw
        .trim_start_matches('<')
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '/' && *c != '>')
        .collect();

    if raw.ends_with("/>") {
        let open = raw[..raw.len() - 2].trim_end();
        return Ok((range, format!("{}>{}</{}>", open, value, qname)));
    }

    let closing = format!("</{}>", qname);
    if raw.ends_with(&closing) {
        let at = range.end - closing.len();
        return Ok((at..at, value.to_string()));
    }

    Err(ProberError::internal(format!(
        "Cannot locate content of <{}> in template",
        qname
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<epp xmlns="urn:ietf:params:xml:ns:epp-1.0">
  <response>
    <result code="1000"><msg>Command completed successfully</msg></result>
    <resData>
      <domain:chkData xmlns:domain="urn:ietf:params:xml:ns:domain-1.0">
        <domain:cd><domain:name avail="0">prober-a.example</domain:name></domain:cd>
      </domain:chkData>
    </resData>
    <trID><clTRID>ABC-123</clTRID><svTRID>server-1</svTRID></trID>
  </response>
</epp>"#;

    fn sel(expr: &str) -> Selector {
        Selector::parse(expr).unwrap()
    }

    #[test]
    fn test_parse_rejects_bad_expressions() {
        assert!(Selector::parse("eppns:clTRID").is_err());
        assert!(Selector::parse("//clTRID").is_err());
        assert!(Selector::parse("//foo:clTRID").is_err());
        assert!(Selector::parse("//eppns:result[@code>='1000'").is_err());
        assert!(Selector::parse("//eppns:result[code='1000']").is_err());
        assert!(Selector::parse("//eppns:clTRID[.=ABC]").is_err());
    }

    #[test]
    fn test_text_and_attribute_predicates() {
        let doc = Document::parse(RESPONSE).unwrap();

        assert!(sel("//eppns:clTRID[.='ABC-123']").matches(&doc));
        assert!(!sel("//eppns:clTRID[.='XYZ']").matches(&doc));
        assert!(sel("//domainns:name[@avail='0']").matches(&doc));
        assert!(!sel("//domainns:name[@avail='1']").matches(&doc));
        assert!(!sel("//eppns:name").matches(&doc));
    }

    #[test]
    fn test_numeric_range_predicates() {
        let doc = Document::parse(RESPONSE).unwrap();

        assert!(sel("//eppns:result[@code>='1000'][@code<'2000']").matches(&doc));
        assert!(!sel("//eppns:result[@code>='2000']").matches(&doc));
        assert!(sel("//eppns:result[@code!='1001']").matches(&doc));
        assert!(sel("//eppns:result[@code<=\"1000\"]").matches(&doc));
    }

    #[test]
    fn test_element_value() {
        let doc = Document::parse(RESPONSE).unwrap();
        assert_eq!(
            element_value(&doc, &sel("//eppns:clTRID")),
            Some("ABC-123".to_string())
        );
        assert_eq!(element_value(&doc, &sel("//eppns:greeting")), None);
    }

    #[test]
    fn test_render_template_replaces_text_and_empty_elements() {
        let template = r#"<?xml version="1.0" encoding="UTF-8"?>
<epp xmlns="urn:ietf:params:xml:ns:epp-1.0">
  <command>
    <login><clID>placeholder</clID><pw/></login>
    <clTRID></clTRID>
  </command>
</epp>"#;

        let rendered = render_template(
            template,
            &[
                (sel("//eppns:clID"), "registrar".to_string()),
                (sel("//eppns:pw"), "p<a>ss&".to_string()),
                (sel("//eppns:clTRID"), "trid-1".to_string()),
            ],
        )
        .unwrap();

        let doc = Document::parse(&rendered).unwrap();
        assert_eq!(
            element_value(&doc, &sel("//eppns:clID")),
            Some("registrar".to_string())
        );
        assert_eq!(
            element_value(&doc, &sel("//eppns:pw")),
            Some("p<a>ss&".to_string())
        );
        assert_eq!(
            element_value(&doc, &sel("//eppns:clTRID")),
            Some("trid-1".to_string())
        );
    }

    #[test]
    fn test_render_template_missing_placeholder_is_internal() {
        let template = r#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0"><hello/></epp>"#;
        let err = render_template(template, &[(sel("//eppns:clTRID"), "x".to_string())])
            .unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_render_template_prefixed_element() {
        let template = r#"<epp xmlns="urn:ietf:params:xml:ns:epp-1.0"
  xmlns:domain="urn:ietf:params:xml:ns:domain-1.0"><command><check>
  <domain:check><domain:name>old.example</domain:name></domain:check>
</check></command></epp>"#;

        let rendered =
            render_template(template, &[(sel("//domainns:name"), "new.example".to_string())])
                .unwrap();
        assert!(rendered.contains("<domain:name>new.example</domain:name>"));
    }
}
