pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;

pub use application::{QueryAnswer, QueryPipeline};
pub use domain::error::{AppError, Result};

use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// filter; calling this more than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> ExitCode {
    init_tracing();
    interfaces::cli::run()
}
