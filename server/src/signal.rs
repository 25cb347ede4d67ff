//! Signal handling for graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Install handlers for SIGINT and SIGTERM.
///
/// The returned flag is set on the first signal; a second signal exits
/// the process immediately.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, exiting immediately");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, stopping listeners");
    })?;

    Ok(shutdown)
}
