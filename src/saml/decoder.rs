//! Response decoding: transport encoding → namespace-aware XML → SAML model.
//!
//! The decoder owns the process-wide unmarshaller registry. It is built once,
//! on first use, behind a [`OnceCell`]; concurrent callers either observe the
//! finished registry or wait for the single initializer.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::OnceCell;
use roxmltree::{Document, Node};

use super::{
    error::DecodeError,
    schema::{
        ASSERTION_NS, Assertion, Attribute, AttributeStatement, AttributeValue, AuthnStatement,
        Conditions, NameId, PROTOCOL_NS, SamlResponse, Subject, XS_NS, XSI_NS,
    },
};

/// Largest accepted transport-encoded token (1 MiB).
pub const MAX_ENCODED_LEN: usize = 1024 * 1024;

/// Largest accepted raw token, leaving room for line breaks in wrapped base64.
const MAX_RAW_TOKEN_LEN: usize = MAX_ENCODED_LEN + MAX_ENCODED_LEN / 16;

/// Zone-less `xs:dateTime` layouts, interpreted as UTC.
const NAIVE_INSTANT_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    String,
    Any,
}

/// Registry of the `xsi:type`s the decoder knows how to unmarshal.
#[derive(Debug)]
struct Unmarshallers {
    value_kinds: HashMap<&'static str, ValueKind>,
}

impl Unmarshallers {
    fn build() -> Result<Self, DecodeError> {
        let mut registry = Self {
            value_kinds: HashMap::new(),
        };
        registry.register("string", ValueKind::String)?;
        registry.register("anyType", ValueKind::Any)?;
        tracing::debug!(
            value_types = registry.value_kinds.len(),
            "SAML unmarshallers initialized"
        );
        Ok(registry)
    }

    fn register(&mut self, type_name: &'static str, kind: ValueKind) -> Result<(), DecodeError> {
        if self.value_kinds.insert(type_name, kind).is_some() {
            return Err(DecodeError::Bootstrap(format!(
                "duplicate unmarshaller registered for xs:{type_name}"
            )));
        }
        Ok(())
    }
}

static UNMARSHALLERS: OnceCell<Unmarshallers> = OnceCell::new();

fn unmarshallers() -> Result<&'static Unmarshallers, DecodeError> {
    UNMARSHALLERS.get_or_try_init(Unmarshallers::build)
}

/// Initialize the unmarshaller registry. Idempotent and safe to call from
/// any number of threads.
pub fn bootstrap() -> Result<(), DecodeError> {
    unmarshallers().map(|_| ())
}

/// Decode a base64 (HTTP-POST binding) SAML response.
///
/// Returns `Ok(None)` when the token is empty or whitespace only: there is
/// nothing to authenticate, which is not an error. Line breaks inside the
/// encoded token are tolerated.
pub fn decode(raw_token: &str) -> Result<Option<SamlResponse>, DecodeError> {
    if raw_token.len() > MAX_RAW_TOKEN_LEN {
        return Err(DecodeError::Encoding(format!(
            "token is {} bytes, limit is {}",
            raw_token.len(),
            MAX_RAW_TOKEN_LEN
        )));
    }

    let compact: String = raw_token
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Ok(None);
    }

    let registry = unmarshallers()?;

    if compact.len() > MAX_ENCODED_LEN {
        return Err(DecodeError::Encoding(format!(
            "encoded response is {} bytes, limit is {}",
            compact.len(),
            MAX_ENCODED_LEN
        )));
    }

    let bytes = STANDARD.decode(compact.as_bytes()).map_err(|e| {
        tracing::debug!(error = %e, "Failed to decode SAML response base64");
        DecodeError::Encoding(e.to_string())
    })?;

    let xml = String::from_utf8(bytes).map_err(|e| {
        tracing::debug!(error = %e, "SAML response is not valid UTF-8");
        DecodeError::Encoding(format!("decoded response is not UTF-8: {e}"))
    })?;

    tracing::debug!(xml_len = xml.len(), "Parsing SAML response");
    parse(&xml, registry).map(Some)
}

/// Decode an already transport-decoded XML document.
pub fn decode_xml(xml: &str) -> Result<SamlResponse, DecodeError> {
    parse(xml, unmarshallers()?)
}

/// Transport-encode an XML response the way an IdP posts it.
pub fn encode(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}

fn parse(xml: &str, registry: &Unmarshallers) -> Result<SamlResponse, DecodeError> {
    // roxmltree rejects DTDs by default, which keeps entity expansion out.
    let document = Document::parse(xml).map_err(|e| {
        tracing::debug!(error = %e, "SAML response is not well-formed XML");
        DecodeError::Xml(e.to_string())
    })?;
    unmarshal_response(document.root_element(), xml, registry)
}

// ─────────────────────────────────────────────────────────────────────────────
// Unmarshalling
// ─────────────────────────────────────────────────────────────────────────────

fn unmarshal_response(
    root: Node<'_, '_>,
    source: &str,
    registry: &Unmarshallers,
) -> Result<SamlResponse, DecodeError> {
    if !has_name(root, PROTOCOL_NS, "Response") {
        return Err(DecodeError::Unmarshal(format!(
            "expected {{{PROTOCOL_NS}}}Response root element, found {}",
            describe(root)
        )));
    }
    check_version(root)?;

    let mut response = SamlResponse {
        id: required_attribute(root, "ID")?.to_string(),
        in_response_to: root.attribute("InResponseTo").map(str::to_string),
        issue_instant: parse_instant(required_attribute(root, "IssueInstant")?, "IssueInstant")?,
        destination: root.attribute("Destination").map(str::to_string),
        issuer: None,
        status_code: None,
        assertions: Vec::new(),
        source: source.to_string(),
    };

    for child in elements(root) {
        match (child.tag_name().namespace(), child.tag_name().name()) {
            (Some(ASSERTION_NS), "Issuer") => response.issuer = text_content(child),
            (Some(PROTOCOL_NS), "Status") => {
                response.status_code = find_child(child, PROTOCOL_NS, "StatusCode")
                    .and_then(|code| code.attribute("Value"))
                    .map(str::to_string);
            }
            (Some(ASSERTION_NS), "Assertion") => {
                response
                    .assertions
                    .push(unmarshal_assertion(child, registry)?);
            }
            (Some(ASSERTION_NS), "EncryptedAssertion") => {
                tracing::debug!("Ignoring encrypted assertion in SAML response");
            }
            _ => {}
        }
    }

    Ok(response)
}

fn unmarshal_assertion(
    node: Node<'_, '_>,
    registry: &Unmarshallers,
) -> Result<Assertion, DecodeError> {
    check_version(node)?;

    let mut assertion = Assertion {
        id: required_attribute(node, "ID")?.to_string(),
        issue_instant: parse_instant(required_attribute(node, "IssueInstant")?, "IssueInstant")?,
        issuer: None,
        subject: None,
        conditions: None,
        authn_statements: Vec::new(),
        attribute_statements: Vec::new(),
    };

    for child in elements(node) {
        if child.tag_name().namespace() != Some(ASSERTION_NS) {
            continue;
        }
        match child.tag_name().name() {
            "Issuer" => assertion.issuer = text_content(child),
            "Subject" => assertion.subject = Some(unmarshal_subject(child)),
            "Conditions" => assertion.conditions = Some(unmarshal_conditions(child)?),
            "AuthnStatement" => assertion
                .authn_statements
                .push(unmarshal_authn_statement(child)?),
            "AttributeStatement" => assertion
                .attribute_statements
                .push(unmarshal_attribute_statement(child, registry)?),
            _ => {}
        }
    }

    Ok(assertion)
}

fn unmarshal_subject(node: Node<'_, '_>) -> Subject {
    let name_id = find_child(node, ASSERTION_NS, "NameID").map(|n| NameId {
        value: text_content(n).unwrap_or_default(),
        format: n.attribute("Format").map(str::to_string),
    });
    Subject { name_id }
}

fn unmarshal_conditions(node: Node<'_, '_>) -> Result<Conditions, DecodeError> {
    let not_before = node
        .attribute("NotBefore")
        .map(|v| parse_instant(v, "NotBefore"))
        .transpose()?;
    let not_on_or_after = node
        .attribute("NotOnOrAfter")
        .map(|v| parse_instant(v, "NotOnOrAfter"))
        .transpose()?;

    let audiences = elements(node)
        .filter(|c| has_name(*c, ASSERTION_NS, "AudienceRestriction"))
        .flat_map(|restriction| elements(restriction))
        .filter(|c| has_name(*c, ASSERTION_NS, "Audience"))
        .filter_map(text_content)
        .collect();

    Ok(Conditions {
        not_before,
        not_on_or_after,
        audiences,
    })
}

fn unmarshal_authn_statement(node: Node<'_, '_>) -> Result<AuthnStatement, DecodeError> {
    Ok(AuthnStatement {
        authn_instant: parse_instant(required_attribute(node, "AuthnInstant")?, "AuthnInstant")?,
        session_index: node.attribute("SessionIndex").map(str::to_string),
    })
}

fn unmarshal_attribute_statement(
    node: Node<'_, '_>,
    registry: &Unmarshallers,
) -> Result<AttributeStatement, DecodeError> {
    let mut attributes = Vec::new();
    for child in elements(node).filter(|c| has_name(*c, ASSERTION_NS, "Attribute")) {
        attributes.push(Attribute {
            name: required_attribute(child, "Name")?.to_string(),
            friendly_name: child.attribute("FriendlyName").map(str::to_string),
            values: elements(child)
                .filter(|v| has_name(*v, ASSERTION_NS, "AttributeValue"))
                .map(|v| unmarshal_attribute_value(v, registry))
                .collect(),
        });
    }
    Ok(AttributeStatement { attributes })
}

fn unmarshal_attribute_value(node: Node<'_, '_>, registry: &Unmarshallers) -> AttributeValue {
    let Some(xsi_type) = node.attribute((XSI_NS, "type")) else {
        return AttributeValue::Any(text_content(node));
    };

    let (prefix, local) = match xsi_type.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, xsi_type),
    };
    let is_schema_type = node.lookup_namespace_uri(prefix) == Some(XS_NS);

    match registry.value_kinds.get(local) {
        Some(ValueKind::String) if is_schema_type => {
            AttributeValue::String(text_content(node).unwrap_or_default())
        }
        Some(ValueKind::Any) if is_schema_type => AttributeValue::Any(text_content(node)),
        _ => AttributeValue::Other {
            type_name: xsi_type.to_string(),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn elements<'a, 'i>(node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(|c| c.is_element())
}

fn find_child<'a, 'i>(node: Node<'a, 'i>, ns: &str, name: &str) -> Option<Node<'a, 'i>> {
    elements(node).find(|c| has_name(*c, ns, name))
}

fn has_name(node: Node<'_, '_>, ns: &str, name: &str) -> bool {
    node.tag_name().namespace() == Some(ns) && node.tag_name().name() == name
}

fn describe(node: Node<'_, '_>) -> String {
    match node.tag_name().namespace() {
        Some(ns) => format!("{{{ns}}}{}", node.tag_name().name()),
        None => node.tag_name().name().to_string(),
    }
}

fn required_attribute<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, DecodeError> {
    node.attribute(name).ok_or_else(|| {
        DecodeError::Unmarshal(format!(
            "{} is missing required attribute {name}",
            describe(node)
        ))
    })
}

fn check_version(node: Node<'_, '_>) -> Result<(), DecodeError> {
    match required_attribute(node, "Version")? {
        "2.0" => Ok(()),
        other => Err(DecodeError::Unmarshal(format!(
            "unsupported SAML version '{other}' on {}",
            describe(node)
        ))),
    }
}

/// Direct text content of an element, trimmed; `None` when empty.
fn text_content(node: Node<'_, '_>) -> Option<String> {
    let text: String = node
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect();
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_instant(value: &str, field: &str) -> Result<DateTime<Utc>, DecodeError> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    NAIVE_INSTANT_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DecodeError::Unmarshal(format!("invalid {field} timestamp '{value}'")))
}
