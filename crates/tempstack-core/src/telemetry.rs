//! Logging for `tempstack`.
//!
//! Everything goes to stderr. stdout carries only what scripts consume: the
//! endpoint printed by `run` and `resolve`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP client crates that log every connection at debug.
const CHATTY_DEPENDENCIES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

/// Install the stderr subscriber. `RUST_LOG` wins over `level`. A second
/// call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
    };
    installed.ok();
}

/// `-v` turns on our own debug output without the HTTP stack's; `-vv`
/// lets everything through.
fn default_directives(level: Level) -> String {
    if level == Level::TRACE {
        return level.as_str().to_lowercase();
    }
    let mut directives = level.as_str().to_lowercase();
    for name in CHATTY_DEPENDENCIES {
        directives.push_str(&format!(",{name}=warn"));
    }
    directives
}

pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
