//! The authentication façade called by the HTTP adapter.
//!
//! [`SamlAuthenticator::authenticate`] drives a raw `SAMLResponse` form value
//! through decode → validate → extract and returns a single
//! [`AuthenticationOutcome`]. Every lower-level failure is folded into
//! [`AuthenticationOutcome::Failed`]; nothing escapes as a panic.
//!
//! Authorization is decoupled from authentication: callers keep the
//! [`ValidatedPrincipal`] and ask for [`AuthorizationFacts`] later through
//! [`SamlAuthenticator::authorize`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::authorization::{AuthorizationFacts, authorize};
use crate::{
    config::MappingConfig,
    saml::{
        AttributeMap, DecodeError, ExtractionError, ResponseValidator, SignatureError,
        SignatureVerifier, TrustedTransport, ValidationError, ValidationOutcome, XmlDsigVerifier,
        decode, extract,
    },
};

/// Attribute values that request a persistent session.
const REMEMBER_ME_VALUES: &[&str] = &["true", "1", "yes"];

/// An identity established from a validated SAML response.
///
/// Created once per successful authentication and owned by the session
/// layer afterwards. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedPrincipal {
    /// NameID of the assertion subject.
    pub subject_id: String,

    /// Attributes from the first attribute statement.
    pub attributes: AttributeMap,

    /// The transport-encoded response this principal was built from,
    /// retained for audit and replay detection.
    pub credentials: String,

    /// Whether the IdP asserted the configured remember-me attribute.
    pub remember_me: bool,

    /// `SessionIndex` from the authentication statement, if any.
    #[serde(default)]
    pub session_index: Option<String>,

    /// Evaluation time of the successful validation.
    pub authenticated_at: DateTime<Utc>,
}

/// Why an authentication attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationFailure {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl AuthenticationFailure {
    /// Stable machine-readable code for logs and error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(DecodeError::Encoding(_)) => "bad_encoding",
            Self::Decode(DecodeError::Xml(_)) => "bad_xml",
            Self::Decode(DecodeError::Unmarshal(_)) => "unmarshal_failure",
            Self::Decode(DecodeError::Bootstrap(_)) => "bootstrap_failure",
            Self::Validation(ValidationError::Expired { .. }) => "expired",
            Self::Validation(ValidationError::NotYetValid { .. }) => "not_yet_valid",
            Self::Validation(ValidationError::NoAssertion) => "no_assertion",
            Self::Validation(ValidationError::Status(_)) => "status_not_success",
            Self::Validation(ValidationError::IssuerMismatch(_)) => "issuer_mismatch",
            Self::Validation(ValidationError::DestinationMismatch(_)) => "destination_mismatch",
            Self::Validation(ValidationError::Signature(_)) => "invalid_signature",
            Self::Extraction(ExtractionError::MissingSubject) => "missing_subject",
        }
    }
}

/// Result of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// No token was presented. Not an error: nothing to authenticate.
    NoToken,
    Authenticated(ValidatedPrincipal),
    Failed(AuthenticationFailure),
}

impl AuthenticationOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

/// Stateless SAML authenticator. Cheap to share behind an `Arc`.
pub struct SamlAuthenticator {
    config: Arc<MappingConfig>,
    validator: ResponseValidator,
}

impl SamlAuthenticator {
    /// Authenticator that requires responses signed with `idp_certificate`,
    /// or accepts unsigned ones when `allow_unsigned` is set.
    pub fn new(config: Arc<MappingConfig>) -> Result<Self, SignatureError> {
        let verifier: Arc<dyn SignatureVerifier> = if config.allow_unsigned {
            tracing::warn!(
                "saml.allow_unsigned is set: response signatures are NOT verified and any \
                 client able to POST to the ACS can authenticate as any subject"
            );
            Arc::new(TrustedTransport)
        } else {
            Arc::new(XmlDsigVerifier::from_certificate(&config.idp_certificate)?)
        };
        Ok(Self::with_verifier(config, verifier))
    }

    pub fn with_verifier(config: Arc<MappingConfig>, verifier: Arc<dyn SignatureVerifier>) -> Self {
        let validator = ResponseValidator::new(&config, verifier);
        Self { config, validator }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Authenticate `raw_token` as of now.
    pub fn authenticate(&self, raw_token: &str) -> AuthenticationOutcome {
        self.authenticate_at(raw_token, Utc::now())
    }

    /// Authenticate `raw_token` as of `now`.
    ///
    /// Same token and same `now` always yield the same outcome.
    #[tracing::instrument(skip(self, raw_token), fields(token_len = raw_token.len()))]
    pub fn authenticate_at(&self, raw_token: &str, now: DateTime<Utc>) -> AuthenticationOutcome {
        match self.try_authenticate(raw_token, now) {
            Ok(Some(principal)) => {
                tracing::info!(
                    remember_me = principal.remember_me,
                    attributes = principal.attributes.len(),
                    "SAML authentication succeeded"
                );
                tracing::debug!(subject_id = %principal.subject_id, "Authenticated SAML subject");
                AuthenticationOutcome::Authenticated(principal)
            }
            Ok(None) => {
                tracing::debug!("No SAML response presented");
                AuthenticationOutcome::NoToken
            }
            Err(failure) => {
                tracing::warn!(code = failure.code(), reason = %failure, "SAML authentication failed");
                AuthenticationOutcome::Failed(failure)
            }
        }
    }

    fn try_authenticate(
        &self,
        raw_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ValidatedPrincipal>, AuthenticationFailure> {
        let Some(response) = decode(raw_token)? else {
            return Ok(None);
        };

        let assertion = match self.validator.validate(&response, now) {
            ValidationOutcome::Valid(assertion) => assertion,
            ValidationOutcome::Invalid(e) => return Err(e.into()),
        };

        let claims = extract(assertion)?;
        let remember_me = self.remember_me_requested(&claims.attributes);

        Ok(Some(ValidatedPrincipal {
            subject_id: claims.subject_id,
            attributes: claims.attributes,
            credentials: raw_token.to_string(),
            remember_me,
            session_index: assertion.session_index().map(str::to_string),
            authenticated_at: now,
        }))
    }

    fn remember_me_requested(&self, attributes: &AttributeMap) -> bool {
        let name = self.config.remember_me_attribute.trim();
        if name.is_empty() {
            return false;
        }
        attributes.get(name).is_some_and(|values| {
            values.iter().any(|v| {
                REMEMBER_ME_VALUES
                    .iter()
                    .any(|accepted| v.trim().eq_ignore_ascii_case(accepted))
            })
        })
    }

    /// Compute authorization facts for an already-authenticated principal.
    pub fn authorize(&self, principal: &ValidatedPrincipal) -> AuthorizationFacts {
        authorize(&principal.attributes, &self.config)
    }
}
