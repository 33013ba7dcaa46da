//! Logging initialization
//!
//! Log targets used across the runtime:
//! - `rill::action` every dispatched action
//! - `rill::perf` merge, install and render timings
//! - `rill::error` caught faults and errors of queued jobs

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::LogConfig;

/// Environment variable that overrides `LogConfig::filter`
pub const LOG_ENV: &str = "RILL_LOG";

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Whether [`init_logging`] has run in this process.
pub fn logging_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

/// Install the global subscriber. Returns `false` when a subscriber was
/// already installed, by this function or by the host.
pub fn init_logging(config: &LogConfig) -> bool {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_target(true));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_names(true));
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };
    if !installed {
        tracing::debug!("a global subscriber was already set; keeping it");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let config = LogConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
        assert!(logging_installed());
    }
}
