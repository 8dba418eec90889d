//! Log setup
//!
//! Logs go to stderr so stdout carries only command output. `RUST_LOG`
//! overrides the level chosen by `--verbose`.

use tracing_subscriber::EnvFilter;

pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "berth=debug,info"
    } else {
        "info"
    }
}

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
