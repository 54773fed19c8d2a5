use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP server configuration for the assertion consumer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Where to send the browser after a successful login, or after a failed
    /// one when it already holds a session.
    #[serde(default = "default_success_url")]
    pub success_url: String,

    /// Where to send the browser when authentication fails.
    #[serde(default = "default_failure_url")]
    pub failure_url: String,

    /// Session cookie configuration.
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            success_url: default_success_url(),
            failure_url: default_failure_url(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.failure_url must not be empty".into(),
            ));
        }
        if self.success_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.success_url must not be empty".into(),
            ));
        }
        self.session.validate()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_success_url() -> String {
    "/".to_string()
}

fn default_failure_url() -> String {
    "/login?error=saml".to_string()
}

/// Session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Cookie name.
    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    /// Session duration in seconds.
    #[serde(default = "default_session_duration")]
    pub duration_secs: u64,

    /// Session duration in seconds when the IdP asserted remember-me.
    #[serde(default = "default_remember_me_duration")]
    pub remember_me_duration_secs: u64,

    /// Secure cookie (HTTPS only).
    #[serde(default = "default_true")]
    pub secure: bool,

    /// SameSite cookie attribute.
    #[serde(default)]
    pub same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_session_cookie(),
            duration_secs: default_session_duration(),
            remember_me_duration_secs: default_remember_me_duration(),
            secure: true,
            same_site: SameSite::default(),
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cookie_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.session.cookie_name must not be empty".into(),
            ));
        }
        if self.duration_secs == 0 {
            return Err(ConfigError::Validation(
                "server.session.duration_secs must be greater than zero".into(),
            ));
        }
        for (field, value) in [
            ("duration_secs", self.duration_secs),
            ("remember_me_duration_secs", self.remember_me_duration_secs),
        ] {
            if value > MAX_SESSION_DURATION_SECS {
                return Err(ConfigError::Validation(format!(
                    "server.session.{field} must be at most {MAX_SESSION_DURATION_SECS}, got {value}"
                )));
            }
        }
        if self.remember_me_duration_secs < self.duration_secs {
            tracing::warn!(
                duration_secs = self.duration_secs,
                remember_me_duration_secs = self.remember_me_duration_secs,
                "Remember-me sessions are shorter than regular sessions"
            );
        }
        Ok(())
    }

    /// Lifetime of a session, in seconds.
    pub fn lifetime_secs(&self, remember_me: bool) -> u64 {
        if remember_me {
            self.remember_me_duration_secs
        } else {
            self.duration_secs
        }
    }
}

/// Longest accepted session lifetime (one year).
pub const MAX_SESSION_DURATION_SECS: u64 = 60 * 60 * 24 * 365;

fn default_session_cookie() -> String {
    "saml2_session".to_string()
}

fn default_session_duration() -> u64 {
    60 * 60 * 8 // 8 hours
}

fn default_remember_me_duration() -> u64 {
    60 * 60 * 24 * 14 // 14 days
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}
