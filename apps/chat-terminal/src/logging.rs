//! Tracing bootstrap for the terminal client.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,chat_terminal=info,chat_client=info,chat_stomp=info";

/// Filter sources, most specific first. The first parsable one wins.
const FILTER_KEYS: [&str; 3] = ["RUST_LOG", "CHAT_TERMINAL_LOG", "CHAT_LOG"];

/// Install the global subscriber. Logs go to stderr so they never interleave
/// with chat lines on stdout.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter_from_lookup(|key| env::var(key).ok()))
        .try_init();
}

fn filter_from_lookup<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    FILTER_KEYS
        .into_iter()
        .filter_map(|key| lookup(key).filter(|value| !value.trim().is_empty()))
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
