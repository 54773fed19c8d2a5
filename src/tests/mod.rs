//! Shared test support.
//!
//! Fixtures here are SAML responses shaped the way an IdP posts them, plus
//! small builders for the variants the unit tests need.

pub(crate) mod fixtures;
