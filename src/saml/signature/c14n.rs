//! Exclusive XML canonicalization (`xml-exc-c14n#`) of an element subtree.
//!
//! roxmltree resolves names to namespace URIs and forgets the prefixes, but
//! canonical output must reproduce them. Qualified names are therefore read
//! back from the element's start tag in the source text.

use std::collections::{BTreeMap, BTreeSet};

use roxmltree::{Node, NodeId};

use super::SignatureError;

pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

/// Prefix → URI of namespace declarations already emitted by an output
/// ancestor. The default namespace is keyed by `""`.
type Rendered = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    with_comments: bool,
    inclusive_prefixes: Vec<String>,
    excluded: Option<NodeId>,
}

impl Canonicalizer {
    /// Canonicalizer for one of the exclusive c14n algorithm URIs.
    pub fn for_algorithm(algorithm: &str) -> Result<Self, SignatureError> {
        match algorithm {
            EXC_C14N => Ok(Self::default()),
            EXC_C14N_WITH_COMMENTS => Ok(Self {
                with_comments: true,
                ..Self::default()
            }),
            other => Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// `InclusiveNamespaces` `PrefixList`; `#default` names the default namespace.
    pub fn with_inclusive_prefixes(mut self, prefix_list: &str) -> Self {
        self.inclusive_prefixes = prefix_list
            .split_ascii_whitespace()
            .map(|p| if p == "#default" { String::new() } else { p.to_string() })
            .collect();
        self
    }

    /// Leave this element and its subtree out of the output (the
    /// enveloped-signature transform).
    pub fn excluding(mut self, node: NodeId) -> Self {
        self.excluded = Some(node);
        self
    }

    pub fn canonicalize(&self, element: Node<'_, '_>) -> Result<String, SignatureError> {
        let mut out = String::new();
        self.write_element(element, &Rendered::new(), &mut out)?;
        Ok(out)
    }

    fn write_element(
        &self,
        node: Node<'_, '_>,
        rendered: &Rendered,
        out: &mut String,
    ) -> Result<(), SignatureError> {
        let tag = StartTag::read(node)?;

        let mut utilized: BTreeSet<&str> = BTreeSet::new();
        utilized.insert(prefix_of(tag.name));
        for qname in &tag.attributes {
            let prefix = prefix_of(qname);
            if !prefix.is_empty() && prefix != "xml" {
                utilized.insert(prefix);
            }
        }
        let mut prefixes: Vec<&str> = utilized.into_iter().collect();
        for prefix in self.inclusive_in_scope(node) {
            prefixes.push(prefix);
        }

        let mut scope = rendered.clone();
        let mut declarations = Vec::new();
        for prefix in prefixes {
            let uri = if prefix.is_empty() {
                node.lookup_namespace_uri(None).unwrap_or("")
            } else {
                node.lookup_namespace_uri(Some(prefix))
                    .ok_or_else(|| SignatureError::Malformed(format!("undeclared prefix '{prefix}'")))?
            };
            let already = scope.get(prefix).map(String::as_str);
            let redundant = if prefix.is_empty() {
                already.unwrap_or("") == uri
            } else {
                already == Some(uri)
            };
            if !redundant {
                scope.insert(prefix.to_string(), uri.to_string());
                declarations.push((prefix, uri));
            }
        }
        declarations.sort_unstable();
        declarations.dedup();

        let values: Vec<_> = node.attributes().collect();
        if values.len() != tag.attributes.len() {
            return Err(SignatureError::Malformed(format!(
                "could not read attributes of <{}>",
                tag.name
            )));
        }
        let mut attributes: Vec<(&str, &str, &str, &str)> = values
            .iter()
            .zip(&tag.attributes)
            .map(|(attr, qname)| (attr.namespace().unwrap_or(""), attr.name(), *qname, attr.value()))
            .collect();
        attributes.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        out.push('<');
        out.push_str(tag.name);
        for (prefix, uri) in &declarations {
            if prefix.is_empty() {
                out.push_str(" xmlns=\"");
            } else {
                out.push_str(" xmlns:");
                out.push_str(prefix);
                out.push_str("=\"");
            }
            escape_attribute(uri, out);
            out.push('"');
        }
        for (_, _, qname, value) in &attributes {
            out.push(' ');
            out.push_str(qname);
            out.push_str("=\"");
            escape_attribute(value, out);
            out.push('"');
        }
        out.push('>');

        for child in node.children() {
            if child.is_element() {
                if Some(child.id()) != self.excluded {
                    self.write_element(child, &scope, out)?;
                }
            } else if child.is_text() {
                escape_text(child.text().unwrap_or(""), out);
            } else if child.is_comment() {
                if self.with_comments {
                    out.push_str("<!--");
                    out.push_str(child.text().unwrap_or(""));
                    out.push_str("-->");
                }
            } else if let Some(pi) = child.pi() {
                out.push_str("<?");
                out.push_str(pi.target);
                if let Some(value) = pi.value {
                    out.push(' ');
                    out.push_str(value);
                }
                out.push_str("?>");
            }
        }

        out.push_str("</");
        out.push_str(tag.name);
        out.push('>');
        Ok(())
    }

    fn inclusive_in_scope<'s>(&'s self, node: Node<'_, '_>) -> impl Iterator<Item = &'s str> {
        self.inclusive_prefixes
            .iter()
            .map(String::as_str)
            .filter(move |prefix| {
                prefix.is_empty()
                    || (*prefix != "xml" && node.lookup_namespace_uri(Some(*prefix)).is_some())
            })
    }
}

/// Qualified names of an element and of its attributes (namespace
/// declarations excluded), in source order.
struct StartTag<'i> {
    name: &'i str,
    attributes: Vec<&'i str>,
}

impl<'i> StartTag<'i> {
    fn read(node: Node<'_, 'i>) -> Result<Self, SignatureError> {
        let source = node.document().input_text();
        let malformed = || SignatureError::Malformed("unreadable start tag".to_string());
        let tag = source.get(node.range().start..).ok_or_else(malformed)?;
        let bytes = tag.as_bytes();
        if bytes.first() != Some(&b'<') {
            return Err(malformed());
        }

        let name_end = scan(bytes, 1, |b| !is_name_end(b));
        let name = &tag[1..name_end];

        let mut attributes = Vec::new();
        let mut pos = name_end;
        loop {
            pos = scan(bytes, pos, |b| b.is_ascii_whitespace());
            match bytes.get(pos) {
                Some(b'>') | Some(b'/') => break,
                None => return Err(malformed()),
                Some(_) => {}
            }

            let qname_end = scan(bytes, pos, |b| !is_name_end(b) && b != b'=');
            let qname = &tag[pos..qname_end];
            pos = scan(bytes, qname_end, |b| b.is_ascii_whitespace());
            if bytes.get(pos) != Some(&b'=') {
                return Err(malformed());
            }
            pos = scan(bytes, pos + 1, |b| b.is_ascii_whitespace());
            let quote = match bytes.get(pos) {
                Some(q @ (b'"' | b'\'')) => *q,
                _ => return Err(malformed()),
            };
            pos = scan(bytes, pos + 1, |b| b != quote) + 1;
            if pos > bytes.len() {
                return Err(malformed());
            }

            if qname != "xmlns" && !qname.starts_with("xmlns:") {
                attributes.push(qname);
            }
        }

        Ok(Self { name, attributes })
    }
}

fn scan(bytes: &[u8], from: usize, keep_going: impl Fn(u8) -> bool) -> usize {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|b| !keep_going(*b))
        .map_or(bytes.len(), |offset| from + offset)
}

fn is_name_end(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'/' || b == b'>'
}

fn prefix_of(qname: &str) -> &str {
    qname.split_once(':').map_or("", |(prefix, _)| prefix)
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}
