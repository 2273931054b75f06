//! Signal handling for interrupted invocations.
//!
//! A command interrupted while waiting on the game server cannot take back a
//! request that was already sent, so an interrupt is reported like a
//! timeout: the action may or may not have been applied.

use tokio::signal;
use tracing::warn;

/// Resolves when the process receives a termination signal.
///
/// # Platform Support
///
/// * **Unix platforms**: Handles SIGINT and SIGTERM signals
/// * **Windows**: Handles Ctrl+C signal
///
/// # Returns
///
/// `Ok(())` when a signal is received, or an error if signal handling setup failed.
pub async fn wait_for_interrupt() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    warn!("📡 Interrupted - pending remote actions may still be applied");
    Ok(())
}
