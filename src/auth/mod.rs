pub mod authenticator;
pub mod authorization;
mod error;
pub mod session_store;

pub use authenticator::{
    AuthenticationFailure, AuthenticationOutcome, SamlAuthenticator, ValidatedPrincipal,
};
pub use authorization::{AuthorizationFacts, authorize};
pub use error::{AuthError, ErrorResponse};
pub use session_store::{
    MemorySessionStore, PrincipalSession, SessionError, SessionStore, SharedSessionStore,
};
