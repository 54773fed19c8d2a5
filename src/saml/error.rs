use chrono::{DateTime, Utc};

/// The raw token could not be turned into a structured response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("SAML response transport encoding is invalid: {0}")]
    Encoding(String),

    #[error("SAML response is not well-formed XML: {0}")]
    Xml(String),

    #[error("SAML response could not be unmarshalled: {0}")]
    Unmarshal(String),

    #[error("SAML library bootstrap failed: {0}")]
    Bootstrap(String),
}

/// The response decoded but is not currently acceptable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("SAML assertion expired at {not_on_or_after}")]
    Expired { not_on_or_after: DateTime<Utc> },

    #[error("SAML assertion not valid before {not_before}")]
    NotYetValid { not_before: DateTime<Utc> },

    #[error("SAML response contains no assertion")]
    NoAssertion,

    #[error("SAML response status is not success: {0}")]
    Status(String),

    #[error("SAML issuer '{0}' does not match the configured identity provider")]
    IssuerMismatch(String),

    #[error("SAML response destination '{0}' does not match the consumer URL")]
    DestinationMismatch(String),

    #[error("SAML signature verification failed: {0}")]
    Signature(String),
}

/// A valid response that does not carry a usable identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("SAML assertion has no subject NameID")]
    MissingSubject,
}
