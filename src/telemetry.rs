use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Target for authentication lifecycle events (login, logout, refresh, password change).
pub const AUTH_TARGET: &str = "auth";
/// Target for security events (failed logins, password resets, denials).
pub const SECURITY_TARGET: &str = "security";
/// Target for management activity on users, units and designations.
pub const ACTIVITY_TARGET: &str = "activity";

/// Initializes structured JSON logging on stdout.
/// The level is controlled by `RUST_LOG`, defaulting to `info`.
pub fn init_telemetry() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
        .init();
}
