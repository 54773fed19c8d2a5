use std::{net::SocketAddr, time::Duration};

use chrono::{DateTime, Utc};
use clap::Parser;
use saml2_realm::{
    AppState,
    auth::{AuthenticationOutcome, SamlAuthenticator},
    config::RealmConfig,
    observability, routes, saml,
};
use serde_json::json;

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// CLI arguments for the SAML realm
#[derive(Parser, Debug)]
#[command(version, about = "SAML 2.0 response validation and claims mapping", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the Assertion Consumer Service (default)
    Serve,
    /// Load and validate the configuration file, then exit
    CheckConfig,
    /// Run a base64 SAMLResponse through the full pipeline and print the result
    CheckResponse {
        /// File containing the base64-encoded SAMLResponse
        #[arg(short, long)]
        file: String,
        /// Evaluate as of this instant (RFC 3339) instead of now
        #[arg(long)]
        at: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::CheckConfig) => run_check_config(args.config.as_deref()),
        Some(Command::CheckResponse { file, at }) => {
            run_check_response(args.config.as_deref(), &file, at.as_deref())
        }
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

fn load_config(path: Option<&str>) -> RealmConfig {
    let Some(path) = path else {
        return RealmConfig::default();
    };
    match RealmConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn run_check_config(path: Option<&str>) {
    let config = load_config(path);
    if let Err(e) = SamlAuthenticator::new(std::sync::Arc::new(config.saml.clone())) {
        eprintln!("Invalid SAML configuration: {}", e);
        std::process::exit(1);
    }
    if config.saml.allow_unsigned {
        println!("Warning: saml.allow_unsigned is set; response signatures are not verified");
    }
    if config.saml.idp_url_prefix.trim().is_empty() {
        println!("Warning: saml.idp_url_prefix is empty; issuer check is disabled");
    }
    if config.saml.sp_consumer_url.trim().is_empty() {
        println!("Warning: saml.sp_consumer_url is empty; destination check is disabled");
    }
    println!("Configuration OK");
}

fn run_check_response(config_path: Option<&str>, file: &str, at: Option<&str>) {
    let config = load_config(config_path);

    let now = match at {
        Some(at) => match DateTime::parse_from_rfc3339(at) {
            Ok(instant) => instant.with_timezone(&Utc),
            Err(e) => {
                eprintln!("Invalid --at instant '{}': {}", at, e);
                std::process::exit(1);
            }
        },
        None => Utc::now(),
    };

    let token = match std::fs::read_to_string(file) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("Failed to read {}: {}", file, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = saml::bootstrap() {
        eprintln!("Failed to initialise SAML decoder: {}", e);
        std::process::exit(1);
    }
    let authenticator = match SamlAuthenticator::new(std::sync::Arc::new(config.saml)) {
        Ok(authenticator) => authenticator,
        Err(e) => {
            eprintln!("Invalid SAML configuration: {}", e);
            std::process::exit(1);
        }
    };

    let (output, ok) = match authenticator.authenticate_at(token.trim(), now) {
        AuthenticationOutcome::Authenticated(principal) => {
            let facts = authenticator.authorize(&principal);
            (
                json!({
                    "outcome": "authenticated",
                    "subject_id": principal.subject_id,
                    "remember_me": principal.remember_me,
                    "session_index": principal.session_index,
                    "attributes": principal.attributes,
                    "roles": facts.roles,
                    "permissions": facts.permissions,
                }),
                true,
            )
        }
        AuthenticationOutcome::NoToken => (json!({ "outcome": "no_token" }), false),
        AuthenticationOutcome::Failed(failure) => (
            json!({
                "outcome": "failed",
                "code": failure.code(),
                "message": failure.to_string(),
            }),
            false,
        ),
    };

    match serde_json::to_string_pretty(&output) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => {
            eprintln!("Failed to render result: {}", e);
            std::process::exit(1);
        }
    }

    if !ok {
        std::process::exit(2);
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = load_config(config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = saml::bootstrap() {
        tracing::error!(error = %e, "Failed to initialise SAML decoder");
        std::process::exit(1);
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(
        config_file = config_path.unwrap_or("<defaults>"),
        idp_url_prefix = %config.saml.idp_url_prefix,
        sp_consumer_url = %config.saml.sp_consumer_url,
        allow_unsigned = config.saml.allow_unsigned,
        "Starting SAML realm"
    );

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load IdP signing certificate");
            std::process::exit(1);
        }
    };
    spawn_session_cleanup(&state);

    let app = routes::router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

fn spawn_session_cleanup(state: &AppState) {
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sessions.cleanup().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Purged expired sessions"),
                Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
