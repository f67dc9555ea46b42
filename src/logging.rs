//! Logging bootstrap for the command-line bot.
//!
//! The library logs through the `log` facade; the subscriber installed here
//! also picks those records up through its `tracing-log` bridge.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,wechat_rust=debug";

/// Environment variable consulted when `RUST_LOG` is not set.
pub const LOG_ENV: &str = "WECHAT_LOG";

/// Initialize the global subscriber.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `WECHAT_LOG`
/// 3) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let custom = env::var(LOG_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok());

    custom.unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init();
    }
}
