//! SAML 2.0 HTTP-POST binding routes.
//!
//! - `POST /saml/acs` - Assertion Consumer Service (receives the SAML Response)
//! - `GET /saml/me` - Identity and authorization facts of the current session
//! - `POST /saml/logout` - Local logout

use axum::{
    Form, Json,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite as CookieSameSite, time::Duration as CookieDuration},
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthError, AuthenticationOutcome, PrincipalSession, session_store::require_session},
    config::{SameSite, SessionConfig},
};

fn cookie_same_site(same_site: SameSite) -> CookieSameSite {
    match same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

/// Session cookie. Persistent only when the IdP asserted remember-me;
/// otherwise it lives as long as the browser session.
fn build_session_cookie(
    session_config: &SessionConfig,
    session_id: Uuid,
    remember_me: bool,
) -> Cookie<'static> {
    let mut builder = Cookie::build((session_config.cookie_name.clone(), session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(session_config.secure)
        .same_site(cookie_same_site(session_config.same_site));
    if remember_me {
        builder = builder.max_age(CookieDuration::seconds(
            session_config.remember_me_duration_secs as i64,
        ));
    }
    builder.build()
}

/// Build a session removal cookie with the same security attributes as the login cookie.
fn build_removal_cookie(session_config: &SessionConfig) -> Cookie<'static> {
    Cookie::build(session_config.cookie_name.clone())
        .path("/")
        .http_only(true)
        .secure(session_config.secure)
        .same_site(cookie_same_site(session_config.same_site))
        .max_age(CookieDuration::ZERO)
        .build()
}

fn session_id_from(cookies: &Cookies, session_config: &SessionConfig) -> Option<Uuid> {
    cookies
        .get(&session_config.cookie_name)
        .and_then(|c| c.value().parse::<Uuid>().ok())
}

/// Only relative paths are honoured, to prevent open redirects.
fn safe_relay_target(relay_state: Option<&str>) -> Option<&str> {
    relay_state.filter(|url| url.starts_with('/') && !url.starts_with("//"))
}

/// Form data from the IdP (HTTP-POST binding).
#[derive(Debug, Deserialize)]
pub struct SamlAcsForm {
    /// Base64-encoded SAML Response. Missing is treated as no token.
    #[serde(rename = "SAMLResponse", default)]
    pub saml_response: String,
    /// Opaque state echoed by the IdP; a relative path is used as the
    /// post-login destination.
    #[serde(rename = "RelayState", default)]
    pub relay_state: Option<String>,
}

/// Assertion Consumer Service endpoint.
///
/// Success stores the principal in a new session and redirects to the
/// relay target or `success_url`. Any failure, including a missing token,
/// redirects to `failure_url`, unless the browser already holds a live
/// session, in which case it goes to `success_url`.
#[tracing::instrument(name = "saml.acs", skip(state, cookies, form))]
pub async fn saml_acs(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<SamlAcsForm>,
) -> Result<Response, AuthError> {
    let server = &state.config.server;
    let session_config = &server.session;

    let principal = match state.authenticator.authenticate(&form.saml_response) {
        AuthenticationOutcome::Authenticated(principal) => principal,
        outcome => {
            let already_authenticated = match session_id_from(&cookies, session_config) {
                Some(id) => require_session(state.sessions.as_ref(), id).await.is_ok(),
                None => false,
            };
            let code = match &outcome {
                AuthenticationOutcome::Failed(failure) => failure.code(),
                _ => "no_token",
            };
            if already_authenticated {
                tracing::info!(code, "SAML login failed but session is active; redirecting to success URL");
                return Ok(Redirect::to(&server.success_url).into_response());
            }
            tracing::info!(code, "SAML login failed; redirecting to failure URL");
            return Ok(Redirect::to(&server.failure_url).into_response());
        }
    };

    let remember_me = principal.remember_me;
    let session = PrincipalSession::new(principal, session_config.lifetime_secs(remember_me));
    state
        .sessions
        .create_session(session.clone())
        .await
        .map_err(|e| AuthError::Internal(format!("Failed to store session: {}", e)))?;

    // Replace any previous session held by this browser
    if let Some(previous) = session_id_from(&cookies, session_config)
        && previous != session.id
    {
        if let Err(e) = state.sessions.delete_session(previous).await {
            tracing::warn!(error = %e, "Failed to delete replaced session");
        }
    }

    cookies.add(build_session_cookie(session_config, session.id, remember_me));

    tracing::info!(
        session_id = %session.id,
        remember_me,
        expires_at = %session.expires_at,
        "SAML session created"
    );

    let redirect_to =
        safe_relay_target(form.relay_state.as_deref()).unwrap_or(server.success_url.as_str());
    Ok(Redirect::to(redirect_to).into_response())
}

/// Current principal with freshly computed authorization facts.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub subject_id: String,
    pub remember_me: bool,
    pub session_index: Option<String>,
    pub authenticated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

#[tracing::instrument(name = "saml.me", skip(state, cookies))]
pub async fn me(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Json<MeResponse>, AuthError> {
    let session_id = session_id_from(&cookies, &state.config.server.session)
        .ok_or(AuthError::MissingSession)?;
    let session = require_session(state.sessions.as_ref(), session_id).await?;

    let facts = state.authenticator.authorize(&session.principal);

    Ok(Json(MeResponse {
        subject_id: session.principal.subject_id,
        remember_me: session.principal.remember_me,
        session_index: session.principal.session_index,
        authenticated_at: session.principal.authenticated_at,
        expires_at: session.expires_at,
        roles: facts.roles.into_iter().collect(),
        permissions: facts.permissions.into_iter().collect(),
    }))
}

/// Logout endpoint. Drops the local session only.
#[tracing::instrument(name = "saml.logout", skip(state, cookies))]
pub async fn logout(State(state): State<AppState>, cookies: Cookies) -> Response {
    let session_config = &state.config.server.session;

    if let Some(session_id) = session_id_from(&cookies, session_config) {
        if let Err(e) = state.sessions.delete_session(session_id).await {
            tracing::warn!(error = %e, "Failed to delete session on logout");
        } else {
            tracing::info!(session_id = %session_id, "SAML session ended");
        }
    }

    cookies.remove(build_removal_cookie(session_config));

    Redirect::to("/").into_response()
}
