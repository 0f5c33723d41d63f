//! Huddle relay binary.
//!
//! Parses configuration, installs logging and serves the relay router.

use std::sync::Arc;

use clap::Parser;

use huddle_relay::auth::JwtIdentityVerifier;
use huddle_relay::state::{RelayConfig, RelayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "huddle-relay", version, about = "Huddle group call signaling relay")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// HS256 secret shared with the account service
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Cookie the session token is read from
    #[arg(long, default_value = "jwt", env = "AUTH_COOKIE_NAME")]
    cookie_name: String,

    /// Maximum participants per call
    #[arg(long, default_value_t = 50, env = "MAX_CALL_PARTICIPANTS")]
    max_call_participants: usize,

    /// Maximum chat message size in bytes
    #[arg(long, default_value_t = 4096, env = "MAX_CHAT_BYTES")]
    max_chat_bytes: usize,

    /// Server region label (e.g. "us-east", "eu-west")
    #[arg(long, default_value = "local", env = "RELAY_REGION")]
    region: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn relay_config(args: &Args) -> RelayConfig {
    RelayConfig {
        port: args.port,
        cookie_name: args.cookie_name.clone(),
        max_call_participants: args.max_call_participants,
        max_chat_bytes: args.max_chat_bytes,
        region: args.region.clone(),
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "huddle_relay=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = relay_config(&args);
    let verifier = Arc::new(JwtIdentityVerifier::new(args.jwt_secret.as_bytes()));
    let state = RelayState::new(config, verifier);
    let addr = format!("0.0.0.0:{}", state.config.port);
    let app = huddle_relay::router(state);

    tracing::info!("Huddle relay server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server error");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, FromArgMatches};

    use super::*;

    /// Parse with every `env = ...` fallback switched off.
    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        let matches = Args::command()
            .mut_args(|arg| arg.env(None::<&str>))
            .try_get_matches_from(argv)?;
        Args::from_arg_matches(&matches)
    }

    #[test]
    fn test_args_defaults() {
        let args = parse(&["huddle-relay", "--jwt-secret", "s3cret"]).unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.jwt_secret, "s3cret");
        assert_eq!(args.cookie_name, "jwt");
        assert_eq!(args.max_call_participants, 50);
        assert_eq!(args.max_chat_bytes, 4096);
        assert_eq!(args.region, "local");
        assert!(!args.log_json);
    }

    #[test]
    fn test_jwt_secret_is_required() {
        let err = parse(&["huddle-relay"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_args_overrides() {
        let args = parse(&[
            "huddle-relay",
            "--jwt-secret",
            "s3cret",
            "--port",
            "9000",
            "--max-call-participants",
            "4",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.max_call_participants, 4);
        assert!(args.log_json);

        let config = relay_config(&args);
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_call_participants, 4);
        assert_eq!(config.cookie_name, "jwt");
    }
}
