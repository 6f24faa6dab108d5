//! Subscriber setup for hosts that do not install their own.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Install a compact human-readable subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already set.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}

/// Like [`init_tracing`], but emits one JSON object per event.
pub fn init_json_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .try_init()
        .is_ok()
}
