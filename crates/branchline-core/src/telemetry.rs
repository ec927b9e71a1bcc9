//! Tracing setup shared by the `branchline` CLI and `branchlined`.
//!
//! Logs go to stderr so the CLI's `--json` output on stdout stays parseable.
//! The filter comes from `BRANCHLINE_LOG`, then `RUST_LOG`, then a default
//! that raises our own crates to the requested level and keeps the HTTP
//! stack at `warn` or quieter.

use std::io;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "BRANCHLINE_LOG";

const OWN_TARGETS: &[&str] = &["branchline", "branchline_core", "branchline_store", "branchlined"];
const HTTP_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "tower_http"];

/// Default filter directives for `level`.
///
/// Targets outside this workspace never log below `warn`.
pub fn default_directives(level: Level) -> String {
    let own = level.as_str().to_ascii_lowercase();
    let quiet = level.min(Level::WARN).as_str().to_ascii_lowercase();

    let mut directives = vec![quiet.clone()];
    directives.extend(OWN_TARGETS.iter().map(|t| format!("{t}={own}")));
    directives.extend(HTTP_TARGETS.iter().map(|t| format!("{t}={quiet}")));
    directives.join(",")
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Only the first call in a process wins.
///
/// `json` switches to newline-delimited JSON with targets and span context.
pub fn init_tracing(json: bool, level: Level) {
    let registry = tracing_subscriber::registry().with(env_filter(level));
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(io::stderr),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init()
            .ok();
    }
}
