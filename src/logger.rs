//! Logging setup shared by the geoanchor binaries.
//!
//! Keeps all executables on the same `tracing` configuration: INFO by
//! default, overridable through `RUST_LOG` (e.g. `RUST_LOG=geoanchor=debug`).

use tracing::Level;

/// Initialize the tracing subscriber with the default INFO level.
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level.
///
/// `RUST_LOG` still takes precedence when set, so a binary started with
/// `RUST_LOG=geoanchor::depth=trace` gets per-module control regardless of
/// the default passed here.
pub fn init_logger_with_level(default_level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(true)
        .with_level(true)
        .init();
}
