pub mod auth;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// HTTP surface of the realm: the SAML HTTP-POST binding endpoints under `/saml`.
pub fn router(state: AppState) -> Router {
    let saml_routes = Router::new()
        .route("/acs", post(auth::saml_acs))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    Router::new()
        .nest("/saml", saml_routes)
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
