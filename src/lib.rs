//! CursorBar - Cursor usage tracker
//!
//! Polls the Cursor dashboard API for premium request and usage-based
//! spending, raises threshold alerts, and backs off when the API fails.

pub mod backoff;
pub mod billing;
pub mod debug_settings;
pub mod display;
pub mod notifier;
pub mod providers;
pub mod settings;
pub mod stats;
pub mod storage;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directory under the platform data dir holding settings, logs and caches.
pub const APP_DIR_NAME: &str = "CursorBar";

const DEFAULT_LOG_FILTER: &str = "cursorbar_lib=info,cursorbar=info";

/// Initialize logging
///
/// Human-readable output goes to stderr so stdout stays free for status
/// lines. The debug file layer only writes while file logging is enabled.
pub fn init_logging(debug_logging: bool) {
    debug_settings::set_file_logging(debug_logging);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(debug_settings::file_writer()),
        )
        .try_init();

    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}
