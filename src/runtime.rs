#![forbid(unsafe_code)]

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Sleeps for a duration but aborts early if the shutdown token fires.
/// Returns `true` if shutdown occurred during the wait.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Cancels `shutdown` on ctrl-c or once `deadline` elapses, whichever comes first.
pub fn spawn_shutdown_watchers(shutdown: CancellationToken, deadline: Option<Duration>) {
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal_token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => tracing::info!("shutdown signal received"),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to listen for shutdown signal");
                        return;
                    }
                }
                signal_token.cancel();
            }
        }
    });

    if let Some(deadline) = deadline {
        tokio::spawn(async move {
            if !sleep_with_shutdown(deadline, &shutdown).await {
                tracing::warn!(
                    deadline_ms = duration_millis(deadline),
                    "readiness deadline elapsed"
                );
                shutdown.cancel();
            }
        });
    }
}

pub fn duration_millis(duration: Duration) -> u64 {
    std::cmp::min(duration.as_millis(), u128::from(u64::MAX)) as u64
}
