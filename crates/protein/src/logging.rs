//! Tracing infrastructure.
//!
//! Standard env-filtered subscriber: `RUST_LOG` selects levels (default
//! `info`), `PROTEIN_LOG_FORMAT=json` switches to structured output.

use tracing_subscriber::{
    filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Initialize tracing for the CLI. Diagnostics go to stderr so they never
/// mix with a document emitted on stdout.
pub fn init_standard_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("PROTEIN_LOG_FORMAT")
        .unwrap_or_default()
        .to_lowercase();

    if log_format == "json" {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        tracing_subscriber::registry()
            .with(json_layer.with_filter(filter))
            .init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact();
        tracing_subscriber::registry()
            .with(fmt_layer.with_filter(filter))
            .init();
    }
}
