//! Bounded PostgreSQL connection pool.
//!
//! [`DbPool`] wraps an `sqlx` [`PgPool`] with the two knobs the service
//! exposes through configuration: the maximum number of open connections and
//! an optional cap on how many of those may sit idle. The idle cap is enforced
//! when a [`PooledConnection`] is returned: if the pool already holds `max_idle`
//! idle connections, the returned one is closed instead of parked.
//!
//! Usage can be sampled at any time through [`PoolSampler::sample`]; sampling
//! reads counters only and never waits on connection acquisition.

use crate::{ConnectError, Error, Result};
use core::ops::{Deref, DerefMut};
use core::str::FromStr;
use sqlx::{
    PgConnection, Postgres,
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPool, PgPoolOptions},
};
use std::sync::{Arc, OnceLock};

/// Pool size used when the configured maximum is `0`.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Point-in-time usage of a connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSample {
    /// Connections currently checked out.
    pub in_use: u32,
    /// Open connections parked in the pool.
    pub idle: u32,
    /// Upper bound on open connections.
    pub max: u32,
}

impl PoolSample {
    /// Fraction of `max` currently checked out, in `[0, 1]`.
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max)
    }
}

/// Non-blocking view of pool usage.
pub trait PoolSampler: Send + Sync + 'static {
    fn sample(&self) -> PoolSample;
}

/// Shared handle to the service's connection pool.
///
/// Cloning is cheap; every clone refers to the same pool and idle cap.
#[derive(Debug, Clone)]
pub struct DbPool {
    inner: PgPool,
    max_idle: Arc<OnceLock<u32>>,
}

impl DbPool {
    /// Parses `conn_str`, opens the pool and validates connectivity by
    /// establishing one connection.
    ///
    /// A `max_conns` of `0` selects [`DEFAULT_MAX_CONNECTIONS`].
    ///
    /// # Errors
    ///
    /// - [`ConnectError::Parse`] if the connection string is malformed.
    /// - [`ConnectError::Unreachable`] if the first connection fails.
    #[tracing::instrument(skip(conn_str))]
    pub async fn connect(conn_str: &str, max_conns: u32) -> core::result::Result<Self, ConnectError> {
        let options = PgConnectOptions::from_str(conn_str).map_err(ConnectError::Parse)?;
        let inner = pool_options(max_conns)
            .connect_with(options)
            .await
            .map_err(ConnectError::Unreachable)?;

        tracing::info!(
            max_connections = inner.options().get_max_connections(),
            "Connected to database"
        );
        Ok(Self::from_pool(inner))
    }

    /// Like [`DbPool::connect`] but defers every connection until first use.
    ///
    /// Nothing is validated beyond the connection string. Must be called from
    /// within a Tokio runtime.
    pub fn connect_lazy(conn_str: &str, max_conns: u32) -> core::result::Result<Self, ConnectError> {
        let options = PgConnectOptions::from_str(conn_str).map_err(ConnectError::Parse)?;
        Ok(Self::from_pool(pool_options(max_conns).connect_lazy_with(options)))
    }

    fn from_pool(inner: PgPool) -> Self {
        Self {
            inner,
            max_idle: Arc::new(OnceLock::new()),
        }
    }

    /// Caps the number of idle connections kept by the pool.
    ///
    /// `0` leaves the pool default in place and is not recorded. A non-zero
    /// limit may be set once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdleLimitAlreadySet`] on a second non-zero call.
    pub fn set_max_idle(&self, max_idle: u32) -> Result<()> {
        if max_idle == 0 {
            return Ok(());
        }
        self.max_idle.set(max_idle).map_err(|_| Error::IdleLimitAlreadySet {
            current: self.max_idle.get().copied().unwrap_or(max_idle),
        })?;

        tracing::debug!(max_idle, "Idle connection limit set");
        Ok(())
    }

    /// The idle cap, or `None` while the pool default applies.
    pub fn max_idle(&self) -> Option<u32> {
        self.max_idle.get().copied()
    }

    pub fn max_connections(&self) -> u32 {
        self.inner.options().get_max_connections()
    }

    /// Checks out a connection, waiting for one to become available.
    ///
    /// # Errors
    ///
    /// Fails if the pool is closed or the acquire timeout elapses.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let conn = self.inner.acquire().await?;
        Ok(PooledConnection {
            conn,
            pool: self.inner.clone(),
            max_idle: Arc::clone(&self.max_idle),
        })
    }

    /// The underlying `sqlx` pool, for executors that take `&PgPool`.
    ///
    /// Connections checked out this way bypass the idle cap.
    pub fn as_pg_pool(&self) -> &PgPool {
        &self.inner
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.inner.close().await;
        tracing::info!("Database pool closed");
    }
}

impl PoolSampler for DbPool {
    fn sample(&self) -> PoolSample {
        let size = self.inner.size();
        let idle = u32::try_from(self.inner.num_idle()).unwrap_or(u32::MAX);
        PoolSample {
            in_use: size.saturating_sub(idle),
            idle,
            max: self.max_connections(),
        }
    }
}

fn pool_options(max_conns: u32) -> PgPoolOptions {
    let max_connections = if max_conns == 0 {
        DEFAULT_MAX_CONNECTIONS
    } else {
        max_conns
    };
    PgPoolOptions::new().max_connections(max_connections)
}

/// A connection checked out of a [`DbPool`].
///
/// Dereferences to [`PgConnection`], so it can be passed as `&mut *conn` to
/// any `sqlx` executor. On drop the connection goes back to the pool unless
/// the idle cap is already reached, in which case it is closed.
pub struct PooledConnection {
    conn: PoolConnection<Postgres>,
    pool: PgPool,
    max_idle: Arc<OnceLock<u32>>,
}

impl Deref for PooledConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if exceeds_idle_cap(self.pool.num_idle(), self.max_idle.get().copied()) {
            self.conn.close_on_drop();
        }
    }
}

/// Whether a connection returned while `num_idle` others sit idle should be
/// closed instead of kept.
fn exceeds_idle_cap(num_idle: usize, max_idle: Option<u32>) -> bool {
    max_idle.is_some_and(|cap| num_idle >= cap as usize)
}
