//! SAML 2.0 realm: validates IdP responses posted to an Assertion Consumer
//! Service, maps the asserted subject and attributes to a principal, and
//! derives roles and permissions from configured attribute names.
//!
//! The core pipeline is [`auth::SamlAuthenticator`]; the [`routes`] module
//! exposes it over HTTP with cookie-backed sessions.

pub mod auth;
pub mod config;
pub mod observability;
pub mod routes;
pub mod saml;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::{
    auth::{MemorySessionStore, SamlAuthenticator, SharedSessionStore},
    config::RealmConfig,
    saml::SignatureError,
};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RealmConfig>,
    pub authenticator: Arc<SamlAuthenticator>,
    pub sessions: SharedSessionStore,
}

impl AppState {
    /// State backed by an in-memory session store. Fails when the IdP
    /// certificate cannot be loaded.
    pub fn new(config: RealmConfig) -> Result<Self, SignatureError> {
        let authenticator = SamlAuthenticator::new(Arc::new(config.saml.clone()))?;
        Ok(Self {
            config: Arc::new(config),
            authenticator: Arc::new(authenticator),
            sessions: Arc::new(MemorySessionStore::new()),
        })
    }
}
