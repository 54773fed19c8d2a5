use serde::{Deserialize, Serialize};

use super::ConfigError;

/// SAML realm configuration: where responses come from, where they are
/// posted to, and how IdP attributes map onto roles and permissions.
///
/// List-valued settings are single comma-separated strings. See
/// [`split_list`] for how they are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Issuers must start with this prefix. Empty disables the check.
    #[serde(default)]
    pub idp_url_prefix: String,

    /// Assertion consumer service URL of this service provider.
    /// Responses that carry a `Destination` must match it exactly.
    /// Empty disables the check.
    #[serde(default)]
    pub sp_consumer_url: String,

    /// Attribute whose value `true`, `1` or `yes` requests a persistent session.
    #[serde(default = "default_remember_me_attribute")]
    pub remember_me_attribute: String,

    /// Roles granted to every authenticated subject.
    #[serde(default)]
    pub default_roles: String,

    /// Permissions granted to every authenticated subject.
    #[serde(default)]
    pub default_permissions: String,

    /// Attributes whose values are granted as roles.
    #[serde(default)]
    pub role_attribute_names: String,

    /// Attributes whose values are granted as permissions.
    #[serde(default)]
    pub permission_attribute_names: String,

    /// Tolerated clock difference with the IdP, in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,

    /// IdP signing certificate: one or more PEM blocks, or the base64 DER
    /// body as it appears in IdP metadata. Responses must carry a signature
    /// from one of these keys.
    #[serde(default)]
    pub idp_certificate: String,

    /// Accept unsigned responses. Only for an IdP reached over a trusted
    /// channel; anyone who can POST to the ACS can then log in as anyone.
    #[serde(default)]
    pub allow_unsigned: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            idp_url_prefix: String::new(),
            sp_consumer_url: String::new(),
            remember_me_attribute: default_remember_me_attribute(),
            default_roles: String::new(),
            default_permissions: String::new(),
            role_attribute_names: String::new(),
            permission_attribute_names: String::new(),
            clock_skew_secs: default_clock_skew(),
            idp_certificate: String::new(),
            allow_unsigned: false,
        }
    }
}

fn default_remember_me_attribute() -> String {
    "REMEMBER_ME".to_string()
}

fn default_clock_skew() -> u64 {
    60
}

/// Longest accepted clock skew (one hour).
pub const MAX_CLOCK_SKEW_SECS: u64 = 3600;

impl MappingConfig {
    pub fn default_roles(&self) -> Vec<String> {
        split_list(&self.default_roles)
    }

    pub fn default_permissions(&self) -> Vec<String> {
        split_list(&self.default_permissions)
    }

    pub fn role_attribute_names(&self) -> Vec<String> {
        split_list(&self.role_attribute_names)
    }

    pub fn permission_attribute_names(&self) -> Vec<String> {
        split_list(&self.permission_attribute_names)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        let consumer_url = self.sp_consumer_url.trim();
        if !consumer_url.is_empty() {
            url::Url::parse(consumer_url).map_err(|e| {
                ConfigError::Validation(format!(
                    "saml.sp_consumer_url '{consumer_url}' is not a valid URL: {e}"
                ))
            })?;
        }

        if self.clock_skew_secs > MAX_CLOCK_SKEW_SECS {
            return Err(ConfigError::Validation(format!(
                "saml.clock_skew_secs must be at most {MAX_CLOCK_SKEW_SECS}, got {}",
                self.clock_skew_secs
            )));
        }

        if self.idp_certificate.trim().is_empty() && !self.allow_unsigned {
            return Err(ConfigError::Validation(
                "saml.idp_certificate is required unless saml.allow_unsigned = true".to_string(),
            ));
        }

        if self.idp_url_prefix.trim().is_empty() {
            tracing::warn!(
                "saml.idp_url_prefix is empty; responses from any issuer will be accepted"
            );
        }

        Ok(())
    }
}

/// Split a comma-separated list, trimming each element and discarding
/// empty ones.
///
/// Deliberately permissive: stray commas and whitespace never fail.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(" a, ,b ,", &["a", "b"])]
    #[case("admin", &["admin"])]
    #[case("admin,user", &["admin", "user"])]
    #[case("  admin ,\tuser  ", &["admin", "user"])]
    #[case("", &[])]
    #[case(" , ,, ", &[])]
    #[case("a,a", &["a", "a"])]
    fn test_split_list(#[case] input: &str, #[case] expected: &[&str]) {
        assert_eq!(split_list(input), expected);
    }

    #[test]
    fn test_defaults() {
        let config = MappingConfig::default();
        assert_eq!(config.remember_me_attribute, "REMEMBER_ME");
        assert_eq!(config.clock_skew_secs, 60);
        assert!(!config.allow_unsigned);
        assert!(config.default_roles().is_empty());
        assert!(config.role_attribute_names().is_empty());
    }

    #[test]
    fn test_list_accessors() {
        let config = MappingConfig {
            default_roles: "user, ".to_string(),
            default_permissions: ",read".to_string(),
            role_attribute_names: "groups , memberOf".to_string(),
            permission_attribute_names: "entitlements".to_string(),
            ..Default::default()
        };
        assert_eq!(config.default_roles(), vec!["user"]);
        assert_eq!(config.default_permissions(), vec!["read"]);
        assert_eq!(config.role_attribute_names(), vec!["groups", "memberOf"]);
        assert_eq!(config.permission_attribute_names(), vec!["entitlements"]);
    }

    #[test]
    fn test_validate_rejects_invalid_consumer_url() {
        let config = MappingConfig {
            sp_consumer_url: "not a url".to_string(),
            allow_unsigned: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(msg)) if msg.contains("sp_consumer_url")
        ));
    }

    #[test]
    fn test_validate_rejects_excessive_skew() {
        let config = MappingConfig {
            clock_skew_secs: 86_400,
            allow_unsigned: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_certificate_by_default() {
        let config = MappingConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(msg)) if msg.contains("idp_certificate")
        ));

        let with_certificate = MappingConfig {
            idp_certificate: "MIIC...".to_string(),
            ..Default::default()
        };
        assert!(with_certificate.validate().is_ok());

        let unsigned = MappingConfig {
            allow_unsigned: true,
            ..Default::default()
        };
        assert!(unsigned.validate().is_ok());
    }

    #[test]
    fn test_deserialize_section() {
        let config: MappingConfig = toml::from_str(
            r#"
            idp_url_prefix = "https://idp.example.org"
            role_attribute_names = "groups"
            clock_skew_secs = 30
            idp_certificate = """
            -----BEGIN CERTIFICATE-----
            MIIB
            -----END CERTIFICATE-----
            """
        "#,
        )
        .unwrap();
        assert_eq!(config.idp_url_prefix, "https://idp.example.org");
        assert_eq!(config.role_attribute_names(), vec!["groups"]);
        assert_eq!(config.clock_skew_secs, 30);
        assert_eq!(config.remember_me_attribute, "REMEMBER_ME");
        assert!(config.idp_certificate.contains("BEGIN CERTIFICATE"));
        assert!(!config.allow_unsigned);
    }
}
