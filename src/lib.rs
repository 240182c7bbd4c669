pub mod api;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod indication;
pub mod ingest;
pub mod llm;
pub mod model;
pub mod query;
pub mod search;
pub mod util;
pub mod vector;

use tracing_subscriber::EnvFilter;

/// Initialize tracing from `RUST_LOG`, falling back to `info` for this crate.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rxsearch=info")),
        )
        .init();
}
