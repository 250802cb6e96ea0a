use super::{Lifecycle, LifecycleState};
use core::future::Future;
use tokio_util::sync::CancellationToken;

/// Failure of a serve loop.
#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    /// Serving was refused because a graceful stop had already been requested.
    ///
    /// This is the expected outcome of a routine shutdown and is filtered out
    /// by [`filter_shutdown_errors`].
    #[error("server stopped")]
    Stopped,

    /// The transport failed while accepting or serving connections.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The listener failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that accepts RPCs until told to stop.
///
/// Implementations must stop accepting new connections as soon as `shutdown`
/// is cancelled, finish the requests already in flight and only then return.
pub trait Serve {
    fn serve(self, shutdown: CancellationToken) -> impl Future<Output = Result<(), ServeError>>;
}

/// Treats the graceful-stop sentinel as success; every other error stays.
pub fn filter_shutdown_errors(res: Result<(), ServeError>) -> Result<(), ServeError> {
    match res {
        Err(ServeError::Stopped) => Ok(()),
        other => other,
    }
}

/// Runs `server` through `Serving` (and `Draining`, if a signal arrives) to
/// `Stopped`, returning the filtered serve result.
pub async fn serve_until_stopped<S: Serve>(
    server: S,
    lifecycle: &Lifecycle,
) -> Result<(), ServeError> {
    let shutdown = lifecycle.shutdown_token();
    // A drain requested during startup must not be reported as serving.
    if !shutdown.is_cancelled() {
        lifecycle.advance(LifecycleState::Serving);
    }
    let res = server.serve(shutdown).await;
    lifecycle.advance(LifecycleState::Stopped);

    match &res {
        Ok(()) | Err(ServeError::Stopped) => tracing::info!("Service shut down successfully"),
        Err(e) => tracing::error!("Serve loop failed: {e}"),
    }
    filter_shutdown_errors(res)
}
