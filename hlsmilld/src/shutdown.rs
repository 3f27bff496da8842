// Graceful shutdown handling
// Interrupt and termination signals fire the shared cancel token

use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Set when a signal triggered the cancellation (drives exit code 130)
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install signal listeners that cancel the given token
///
/// The listeners only flip state and cancel the token; all of the actual
/// teardown happens on the main path, which drains in-flight jobs with the
/// usual grace discipline.
pub fn install_signal_handlers(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let token = cancel.clone();
        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            sigterm.recv().await;
            info!("termination signal received, shutting down...");
            INTERRUPTED.store(true, Ordering::Relaxed);
            token.cancel();
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down...");
            INTERRUPTED.store(true, Ordering::Relaxed);
            cancel.cancel();
        }
    });
}

/// Whether a signal caused the shutdown
pub fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}
