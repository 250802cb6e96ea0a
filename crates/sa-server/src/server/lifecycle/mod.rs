//! Service lifecycle state machine.
//!
//! ```text
//! Initializing -> Serving -> Draining -> Stopped
//!       |   |                   ^            ^
//!       |   +-------------------+            |
//!       +------------------------------------+
//! ```
//!
//! - `Initializing`: configuration, pool, metrics and server are being built.
//!   A fatal error here goes straight to `Stopped` and no RPC is accepted.
//! - `Serving`: the gRPC server accepts connections.
//! - `Draining`: a termination signal arrived. New connections and streams are
//!   refused while in-flight RPCs run to completion with whatever parallelism
//!   tokens they hold. A signal during startup drains straight from
//!   `Initializing`, and the service never reports `Serving` afterwards.
//! - `Stopped`: the serve loop returned. Terminal.
//!
//! [`Lifecycle`] publishes the state through a `watch` channel and owns the
//! shutdown [`CancellationToken`] handed to the serve loop, so the drain can
//! be triggered and observed without OS signals.

pub mod serve;
pub mod signals;

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Serving,
    Draining,
    Stopped,
}

impl LifecycleState {
    /// Whether `self -> next` is an edge of the state machine.
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Serving)
                | (Self::Initializing, Self::Draining)
                | (Self::Initializing, Self::Stopped)
                | (Self::Serving, Self::Draining)
                | (Self::Serving, Self::Stopped)
                | (Self::Draining, Self::Stopped)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Shared handle to the process lifecycle. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<LifecycleState>>,
    shutdown: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Initializing);
        Self {
            state: Arc::new(tx),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Token cancelled when the drain begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Moves to `next` if that is a valid transition. Returns whether the
    /// state changed.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.can_advance_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if changed {
            tracing::debug!(state = next.as_str(), "Lifecycle transition");
        }
        changed
    }

    /// Enters `Draining` and asks the serve loop to stop accepting work.
    pub fn begin_drain(&self) {
        self.advance(LifecycleState::Draining);
        self.shutdown.cancel();
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
