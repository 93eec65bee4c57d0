//! Tracing subscriber setup.
//!
//! `RUST_LOG` overrides the default filter. Output goes to stderr so that
//! `ragd query` can print its JSON result on stdout.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "rag_gateway=info,tower_http=info";

pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A subscriber may already be installed (tests, embedding binaries).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
