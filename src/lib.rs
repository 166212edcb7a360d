pub mod batch;
pub mod config;
pub mod conversion_warnings;
pub mod converters;
pub mod error;
pub mod image_utils;
pub mod limiter;
pub mod metrics;
pub mod models;
pub mod ordered;
pub mod providers;
pub mod registry;
pub mod router;
pub mod streaming;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Note: This function can only be called once per process. Embedding
/// applications that install their own subscriber should skip it.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
