//! Signal handling for the sync loop.
//!
//! SIGINT, SIGTERM and SIGHUP cancel a shared [`CancellationToken`]; the
//! orchestrator stops starting albums and downloads, lets in-flight file
//! writes finish, and the watch loop exits. A second signal exits with 130.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Register the signal listeners and return the token they cancel.
///
/// Registration happens before this returns, so a failure to install a
/// handler surfaces to the caller instead of inside the background task.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let signals = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        )
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            let received = tokio::select! {
                r = tokio::signal::ctrl_c() => r.map(|()| "SIGINT"),
                _ = sigterm.recv() => Ok("SIGTERM"),
                _ = sighup.recv() => Ok("SIGHUP"),
            };

            #[cfg(not(unix))]
            let received = tokio::signal::ctrl_c().await.map(|()| "Ctrl+C");

            let name = match received {
                Ok(name) => name,
                Err(e) => {
                    tracing::error!("Signal listener failed: {}", e);
                    return;
                }
            };

            if signals.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Received {}, finishing in-flight downloads...", name);
                tracing::info!("Send the signal again to exit immediately");
                handler_token.cancel();
            } else {
                tracing::warn!("Received {} again, exiting", name);
                std::process::exit(130);
            }
        }
    });

    Ok(token)
}
