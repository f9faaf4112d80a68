//! Shared test setup: a one-shot logger/tracing init for test binaries.

use std::sync::OnceLock;

use crate::logger::{init_logger, init_tracing};

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize the logger and tracing subscriber.
///
/// # Panics
///
/// Panics if the logger or tracing subscriber cannot be initialized.
pub fn init() {
    INIT.get_or_init(|| {
        init_logger(log::LevelFilter::Debug, None);
        if let Err(e) = tracing::subscriber::set_global_default(init_tracing()) {
            panic!("Error setting global default tracing subscriber: {e:?}")
        }
    });
}
