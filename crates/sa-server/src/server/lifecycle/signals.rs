//! Process termination signals.
//!
//! Handlers are installed during startup so a failure to register them is a
//! startup error. Afterwards a dedicated task waits for the first signal and
//! starts the drain through [`Lifecycle::begin_drain`].

use super::Lifecycle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Installed handlers for the signals that stop the service.
pub struct TerminationSignals {
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    hangup: Signal,
}

impl TerminationSignals {
    /// Registers SIGTERM, SIGINT and SIGHUP handlers (Ctrl+C elsewhere).
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                interrupt: signal(SignalKind::interrupt())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next termination signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.terminate.recv() => "SIGTERM",
                _ = self.interrupt.recv() => "SIGINT",
                _ = self.hangup.recv() => "SIGHUP",
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(_e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {_e}");
                std::future::pending::<()>().await;
            }
            "Ctrl+C"
        }
    }
}

/// Spawns the task that turns the first termination signal into a drain.
///
/// The task also ends, without doing anything, if the drain was started by
/// someone else.
pub fn spawn_signal_listener(
    mut signals: TerminationSignals,
    lifecycle: Lifecycle,
    tracker: &TaskTracker,
) -> JoinHandle<()> {
    let shutdown = lifecycle.shutdown_token();
    tracker.spawn(async move {
        tokio::select! {
            name = signals.recv() => {
                tracing::info!("Received {name}, terminating gracefully...");
                lifecycle.begin_drain();
            }
            () = shutdown.cancelled() => {}
        }
    })
}
