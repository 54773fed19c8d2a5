//! Structured model of a SAML 2.0 protocol `Response`.
//!
//! Only the parts of the SAML object model that the realm consumes are
//! represented: response envelope, status, assertions with their subject,
//! conditions, authentication and attribute statements.

use chrono::{DateTime, Utc};

/// `samlp:` protocol namespace.
pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// `saml:` assertion namespace.
pub const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// XML Schema namespace used in `xsi:type` values.
pub const XS_NS: &str = "http://www.w3.org/2001/XMLSchema";
/// XML Schema instance namespace (`xsi:type`).
pub const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
/// Top-level status code for a successful response.
pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// A decoded SAML 2.0 `samlp:Response`.
#[derive(Debug, Clone, PartialEq)]
pub struct SamlResponse {
    /// `ID` attribute
    pub id: String,
    /// `InResponseTo` attribute (absent for IdP-initiated SSO)
    pub in_response_to: Option<String>,
    /// `IssueInstant` attribute
    pub issue_instant: DateTime<Utc>,
    /// `Destination` attribute
    pub destination: Option<String>,
    /// Response-level `saml:Issuer`
    pub issuer: Option<String>,
    /// Top-level `samlp:StatusCode` value
    pub status_code: Option<String>,
    /// Plain (unencrypted) assertions in document order
    pub assertions: Vec<Assertion>,
    /// The XML document the response was unmarshalled from
    pub source: String,
}

impl SamlResponse {
    /// Whether the top-level status is `Success`.
    pub fn is_success(&self) -> bool {
        self.status_code.as_deref() == Some(STATUS_SUCCESS)
    }
}

/// A `saml:Assertion`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub id: String,
    pub issue_instant: DateTime<Utc>,
    pub issuer: Option<String>,
    pub subject: Option<Subject>,
    pub conditions: Option<Conditions>,
    pub authn_statements: Vec<AuthnStatement>,
    pub attribute_statements: Vec<AttributeStatement>,
}

impl Assertion {
    /// NameID value of the subject, if any.
    pub fn name_id(&self) -> Option<&str> {
        self.subject
            .as_ref()
            .and_then(|s| s.name_id.as_ref())
            .map(|n| n.value.as_str())
    }

    /// `SessionIndex` of the first authentication statement.
    pub fn session_index(&self) -> Option<&str> {
        self.authn_statements
            .first()
            .and_then(|s| s.session_index.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub name_id: Option<NameId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NameId {
    pub value: String,
    pub format: Option<String>,
}

/// `saml:Conditions` validity window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conditions {
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Audiences from all `AudienceRestriction` elements
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthnStatement {
    pub authn_instant: DateTime<Utc>,
    pub session_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeStatement {
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub friendly_name: Option<String>,
    pub values: Vec<AttributeValue>,
}

/// A single `saml:AttributeValue`, tagged by its schema type.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// `xsi:type="xs:string"`
    String(String),
    /// Untyped or `xs:anyType` open content; carries the element's text content.
    Any(Option<String>),
    /// Any other schema type (e.g. `xs:integer`, `xs:dateTime`).
    Other { type_name: String },
}
