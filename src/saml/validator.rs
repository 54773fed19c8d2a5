//! Temporal and structural validation of a decoded response.
//!
//! A response that fails validation is not malformed input, it simply does
//! not establish authentication right now. The validator therefore reports
//! an [`ValidationOutcome::Invalid`] value instead of an `Err`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::{
    error::ValidationError,
    schema::{Assertion, SamlResponse},
};
use crate::config::{MAX_CLOCK_SKEW_SECS, MappingConfig};

/// Verifies the XML signature of a decoded response.
///
/// The validator only calls into it and maps its verdict. See
/// [`XmlDsigVerifier`](super::signature::XmlDsigVerifier).
pub trait SignatureVerifier: Send + Sync {
    /// Return `Err(reason)` when the document must not be trusted.
    fn verify(&self, response: &SamlResponse) -> Result<(), String>;
}

/// Accepts every response. Selected only by `saml.allow_unsigned`, for an
/// IdP reached over a trusted channel that does not sign responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedTransport;

impl SignatureVerifier for TrustedTransport {
    fn verify(&self, _response: &SamlResponse) -> Result<(), String> {
        Ok(())
    }
}

/// Result of [`ResponseValidator::validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome<'r> {
    /// The assertion to use downstream.
    Valid(&'r Assertion),
    Invalid(ValidationError),
}

/// Checks issue instant, conditions window, status, issuer and destination.
pub struct ResponseValidator {
    clock_skew: Duration,
    idp_url_prefix: Option<String>,
    sp_consumer_url: Option<String>,
    verifier: Arc<dyn SignatureVerifier>,
}

impl ResponseValidator {
    /// Skew beyond one hour is clamped to one hour.
    pub fn new(config: &MappingConfig, verifier: Arc<dyn SignatureVerifier>) -> Self {
        if config.clock_skew_secs > MAX_CLOCK_SKEW_SECS {
            tracing::warn!(
                clock_skew_secs = config.clock_skew_secs,
                max = MAX_CLOCK_SKEW_SECS,
                "Clock skew clamped"
            );
        }
        let skew_secs = config.clock_skew_secs.min(MAX_CLOCK_SKEW_SECS) as i64;
        Self {
            clock_skew: Duration::try_seconds(skew_secs).unwrap_or_else(Duration::zero),
            idp_url_prefix: non_empty(&config.idp_url_prefix),
            sp_consumer_url: non_empty(&config.sp_consumer_url),
            verifier,
        }
    }

    /// Validate `response` as of `now`.
    ///
    /// Only the first assertion is considered; any further assertions are
    /// ignored. An empty assertion list is reported as
    /// [`ValidationError::NoAssertion`].
    pub fn validate<'r>(
        &self,
        response: &'r SamlResponse,
        now: DateTime<Utc>,
    ) -> ValidationOutcome<'r> {
        match self.check(response, now) {
            Ok(assertion) => ValidationOutcome::Valid(assertion),
            Err(e) => {
                tracing::debug!(
                    response_id = %response.id,
                    reason = %e,
                    "SAML response failed validation"
                );
                ValidationOutcome::Invalid(e)
            }
        }
    }

    fn check<'r>(
        &self,
        response: &'r SamlResponse,
        now: DateTime<Utc>,
    ) -> Result<&'r Assertion, ValidationError> {
        self.verifier
            .verify(response)
            .map_err(ValidationError::Signature)?;

        if !response.is_success() {
            return Err(ValidationError::Status(
                response
                    .status_code
                    .clone()
                    .unwrap_or_else(|| "missing status".to_string()),
            ));
        }

        self.check_issuer(response.issuer.as_deref())?;

        if let (Some(expected), Some(destination)) = (&self.sp_consumer_url, &response.destination)
            && destination != expected
        {
            return Err(ValidationError::DestinationMismatch(destination.clone()));
        }

        if response.issue_instant > self.latest_acceptable(now) {
            return Err(ValidationError::NotYetValid {
                not_before: response.issue_instant,
            });
        }

        let assertion = response
            .assertions
            .first()
            .ok_or(ValidationError::NoAssertion)?;
        if response.assertions.len() > 1 {
            tracing::debug!(
                count = response.assertions.len(),
                "Ignoring assertions after the first"
            );
        }

        self.check_issuer(assertion.issuer.as_deref())?;
        self.check_window(assertion, now)?;

        Ok(assertion)
    }

    fn latest_acceptable(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.clock_skew)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn earliest_acceptable(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.clock_skew)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn check_issuer(&self, issuer: Option<&str>) -> Result<(), ValidationError> {
        match (&self.idp_url_prefix, issuer) {
            (Some(prefix), Some(issuer)) if !issuer.starts_with(prefix.as_str()) => {
                Err(ValidationError::IssuerMismatch(issuer.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn check_window(&self, assertion: &Assertion, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let Some(conditions) = &assertion.conditions else {
            return Ok(());
        };

        if let Some(not_before) = conditions.not_before
            && self.latest_acceptable(now) < not_before
        {
            return Err(ValidationError::NotYetValid { not_before });
        }

        if let Some(not_on_or_after) = conditions.not_on_or_after
            && self.earliest_acceptable(now) >= not_on_or_after
        {
            return Err(ValidationError::Expired { not_on_or_after });
        }

        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::{
        saml::decoder::decode_xml,
        tests::fixtures::{
            IDP_ISSUER, SAMPLE_SAML_RESPONSE, SP_CONSUMER_URL, assertion_xml, inside_window,
            response_xml, response_xml_with_status,
        },
    };

    struct RejectAll;

    impl SignatureVerifier for RejectAll {
        fn verify(&self, _response: &SamlResponse) -> Result<(), String> {
            Err("signature digest mismatch".to_string())
        }
    }

    fn validator(config: MappingConfig) -> ResponseValidator {
        ResponseValidator::new(&config, Arc::new(TrustedTransport))
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2004, 12, 5, h, m, s).unwrap()
    }

    #[test]
    fn test_sample_response_is_valid_inside_window() {
        let response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        match validator(MappingConfig::default()).validate(&response, inside_window()) {
            ValidationOutcome::Valid(assertion) => {
                assert_eq!(assertion.name_id(), Some("shiro-saml2"))
            }
            other => panic!("Expected Valid, got: {:?}", other),
        }
    }

    #[rstest]
    // the window is [09:17:05, 09:27:05) widened by 60s of skew
    #[case(at(9, 17, 5), true)]
    #[case(at(9, 16, 5), true)]
    #[case(at(9, 28, 4), true)]
    #[case(at(9, 16, 4), false)]
    #[case(at(9, 28, 5), false)]
    fn test_conditions_window_with_skew(#[case] now: DateTime<Utc>, #[case] valid: bool) {
        let response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        // The response's own IssueInstant (09:22:05) must not reject early instants here.
        let mut response = response;
        response.issue_instant = at(9, 0, 0);

        let outcome = validator(MappingConfig::default()).validate(&response, now);
        assert_eq!(matches!(outcome, ValidationOutcome::Valid(_)), valid);
    }

    #[test]
    fn test_expired_assertion() {
        let response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        let outcome = validator(MappingConfig::default()).validate(&response, at(12, 0, 0));
        assert_eq!(
            outcome,
            ValidationOutcome::Invalid(ValidationError::Expired {
                not_on_or_after: at(9, 27, 5)
            })
        );
    }

    #[test]
    fn test_not_yet_valid_assertion() {
        let mut response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        response.issue_instant = at(8, 0, 0);
        let outcome = validator(MappingConfig::default()).validate(&response, at(9, 0, 0));
        assert_eq!(
            outcome,
            ValidationOutcome::Invalid(ValidationError::NotYetValid {
                not_before: at(9, 17, 5)
            })
        );
    }

    #[test]
    fn test_future_issue_instant_is_not_yet_valid() {
        let response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        let outcome = validator(MappingConfig::default()).validate(&response, at(9, 0, 0));
        assert_eq!(
            outcome,
            ValidationOutcome::Invalid(ValidationError::NotYetValid {
                not_before: at(9, 22, 5)
            })
        );
    }

    #[test]
    fn test_oversized_skew_is_clamped() {
        let config = MappingConfig {
            clock_skew_secs: 10_000_000_000_000_000,
            ..Default::default()
        };
        let response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();

        let validator = validator(config);
        // Within one hour of NotBefore the clamped skew still applies
        assert!(matches!(
            validator.validate(&response, at(9, 0, 0)),
            ValidationOutcome::Valid(_)
        ));
        // Beyond it the assertion is not yet valid
        assert!(matches!(
            validator.validate(&response, at(7, 0, 0)),
            ValidationOutcome::Invalid(ValidationError::NotYetValid { .. })
        ));
    }

    #[test]
    fn test_extreme_instants_do_not_overflow() {
        let response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        let validator = validator(MappingConfig::default());
        assert!(matches!(
            validator.validate(&response, DateTime::<Utc>::MAX_UTC),
            ValidationOutcome::Invalid(ValidationError::Expired { .. })
        ));
        assert!(matches!(
            validator.validate(&response, DateTime::<Utc>::MIN_UTC),
            ValidationOutcome::Invalid(ValidationError::NotYetValid { .. })
        ));
    }

    #[test]
    fn test_zero_skew_is_exact() {
        let config = MappingConfig {
            clock_skew_secs: 0,
            ..Default::default()
        };
        let mut response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        response.issue_instant = at(9, 0, 0);

        let validator = validator(config);
        assert!(matches!(
            validator.validate(&response, at(9, 27, 4)),
            ValidationOutcome::Valid(_)
        ));
        assert!(matches!(
            validator.validate(&response, at(9, 27, 5)),
            ValidationOutcome::Invalid(ValidationError::Expired { .. })
        ));
    }

    #[test]
    fn test_empty_assertion_list() {
        let response = decode_xml(&response_xml(&[])).unwrap();
        assert_eq!(
            validator(MappingConfig::default()).validate(&response, inside_window()),
            ValidationOutcome::Invalid(ValidationError::NoAssertion)
        );
    }

    #[test]
    fn test_only_first_assertion_is_used() {
        let response = decode_xml(&response_xml(&[
            assertion_xml(Some("first"), &[]),
            assertion_xml(Some("second"), &[]),
        ]))
        .unwrap();
        match validator(MappingConfig::default()).validate(&response, inside_window()) {
            ValidationOutcome::Valid(assertion) => assert_eq!(assertion.name_id(), Some("first")),
            other => panic!("Expected Valid, got: {:?}", other),
        }
    }

    #[test]
    fn test_non_success_status() {
        let status = "urn:oasis:names:tc:SAML:2.0:status:Requester";
        let response = decode_xml(&response_xml_with_status(status, &[])).unwrap();
        assert_eq!(
            validator(MappingConfig::default()).validate(&response, inside_window()),
            ValidationOutcome::Invalid(ValidationError::Status(status.to_string()))
        );
    }

    #[test]
    fn test_issuer_prefix() {
        let response = decode_xml(&response_xml(&[assertion_xml(Some("u"), &[])])).unwrap();

        let matching = MappingConfig {
            idp_url_prefix: "https://idp.example.org/".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            validator(matching).validate(&response, inside_window()),
            ValidationOutcome::Valid(_)
        ));

        let other = MappingConfig {
            idp_url_prefix: "https://login.example.net".to_string(),
            ..Default::default()
        };
        assert_eq!(
            validator(other).validate(&response, inside_window()),
            ValidationOutcome::Invalid(ValidationError::IssuerMismatch(IDP_ISSUER.to_string()))
        );
    }

    #[test]
    fn test_destination_must_match_consumer_url() {
        let response = decode_xml(&response_xml(&[assertion_xml(Some("u"), &[])])).unwrap();

        let matching = MappingConfig {
            sp_consumer_url: SP_CONSUMER_URL.to_string(),
            ..Default::default()
        };
        assert!(matches!(
            validator(matching).validate(&response, inside_window()),
            ValidationOutcome::Valid(_)
        ));

        let other = MappingConfig {
            sp_consumer_url: "https://other.example.com/acs".to_string(),
            ..Default::default()
        };
        assert_eq!(
            validator(other).validate(&response, inside_window()),
            ValidationOutcome::Invalid(ValidationError::DestinationMismatch(
                SP_CONSUMER_URL.to_string()
            ))
        );
    }

    #[test]
    fn test_signature_rejection() {
        let response = decode_xml(SAMPLE_SAML_RESPONSE).unwrap();
        let validator = ResponseValidator::new(&MappingConfig::default(), Arc::new(RejectAll));
        assert_eq!(
            validator.validate(&response, inside_window()),
            ValidationOutcome::Invalid(ValidationError::Signature(
                "signature digest mismatch".to_string()
            ))
        );
    }
}
