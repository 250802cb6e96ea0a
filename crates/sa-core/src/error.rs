//! Error types shared by the storage-authority runtime.
//!
//! [`Error`] covers every reportable failure of the pieces in this crate. It
//! implements `From<Error>` for `tonic::Status` so request handlers built on
//! top of the [`Governor`](crate::Governor) and [`DbPool`](crate::DbPool) can
//! propagate failures to clients with `?`.
//!
//! Pool creation has its own [`ConnectError`] because the two ways it fails
//! (a malformed connection string and an unreachable database) are reported
//! differently at startup.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the storage-authority runtime.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Creating the connection pool failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A query or connection acquisition on an established pool failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// `set_max_idle` was called more than once.
    #[error("Idle connection limit already set to {current}")]
    IdleLimitAlreadySet { current: u32 },

    /// A metric could not be registered.
    #[error("Metric error: {reason}")]
    Metric { reason: String },

    /// A feature flag name is not known to this build.
    #[error("Unknown feature flag: {name}")]
    UnknownFeature { name: String },

    /// The RPC that owns this unit of work was cancelled.
    #[error("Request cancelled by client")]
    RequestCancelled,
}

/// Failure while creating a [`DbPool`](crate::DbPool).
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    /// The connection string could not be parsed.
    #[error("Invalid connection string: {0}")]
    Parse(#[source] sqlx::Error),

    /// The initial connection to the database could not be established.
    #[error("Could not reach database: {0}")]
    Unreachable(#[source] sqlx::Error),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::Database(sqlx::Error::PoolTimedOut) => {
                Status::resource_exhausted("Timed out waiting for a database connection")
            }
            Error::Database(sqlx::Error::PoolClosed) => {
                Status::unavailable("Service is shutting down")
            }
            Error::Database(e) => Status::internal(format!("Database error: {e}")),
            other => Status::internal(other.to_string()),
        }
    }
}
