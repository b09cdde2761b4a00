//! Ctrl-C handling
//!
//! A background thread owns a small Tokio runtime whose only job is to wait
//! for SIGINT and flip a [`CancellationToken`]. The engines notice the flag
//! at their next subprocess boundary.

use crate::executor::CancellationToken;

/// Spawns the listener and returns the token it cancels
#[must_use]
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
                    return;
                }
            };
            if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                tracing::warn!("Interrupted, cancelling after the current step");
                trigger.cancel();
            }
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Cannot spawn Ctrl-C listener");
    }
    token
}
