//! Background reporting of connection pool health.
//!
//! [`HealthReporter`] publishes the pool's configured maximum once, when it is
//! created, and then samples live usage on a fixed interval. It runs
//! independently of request traffic on a [`TaskTracker`] so the owner can
//! cancel and join it deterministically; the service itself does not wait for
//! it on shutdown.

use crate::pool::{PoolSample, PoolSampler};
use crate::{MetricsScope, Result};
use core::time::Duration;
use metrics::Gauge;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub const MAX_CONNECTIONS_GAUGE: &str = "max_db_connections";
pub const IN_USE_CONNECTIONS_GAUGE: &str = "db_open_connections_in_use";
pub const IDLE_CONNECTIONS_GAUGE: &str = "db_idle_connections";

/// How often live usage is sampled unless configured otherwise.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Utilization above which each sample is logged as a warning.
const HIGH_UTILIZATION: f64 = 0.8;

pub struct HealthReporter<S> {
    sampler: S,
    in_use: Gauge,
    idle: Gauge,
    interval: Duration,
}

impl<S: PoolSampler> HealthReporter<S> {
    /// Registers the pool gauges in `scope` and publishes the maximum.
    ///
    /// # Errors
    ///
    /// Fails if any of the gauge names is already registered.
    pub fn new(sampler: S, scope: &MetricsScope, interval: Duration) -> Result<Self> {
        let max = scope.gauge(
            MAX_CONNECTIONS_GAUGE,
            "Maximum number of DB connections allowed.",
        )?;
        let in_use = scope.gauge(
            IN_USE_CONNECTIONS_GAUGE,
            "Number of DB connections currently checked out.",
        )?;
        let idle = scope.gauge(
            IDLE_CONNECTIONS_GAUGE,
            "Number of open DB connections parked in the pool.",
        )?;

        max.set(f64::from(sampler.sample().max));

        Ok(Self {
            sampler,
            in_use,
            idle,
            interval,
        })
    }

    /// Starts the sampling loop on `tracker`. The loop ends when `shutdown`
    /// is cancelled.
    pub fn spawn(self, tracker: &TaskTracker, shutdown: CancellationToken) -> JoinHandle<()> {
        tracker.spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval = ?self.interval, "Starting DB pool health reporting");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => self.report(self.sampler.sample()),
            }
        }

        tracing::debug!("DB pool health reporting stopped");
    }

    fn report(&self, sample: PoolSample) {
        self.in_use.set(f64::from(sample.in_use));
        self.idle.set(f64::from(sample.idle));

        tracing::trace!(
            in_use = sample.in_use,
            idle = sample.idle,
            max = sample.max,
            "DB pool sample"
        );

        let utilization = sample.utilization();
        if utilization > HIGH_UTILIZATION {
            tracing::warn!(
                "High DB pool utilization: {:.1}% ({}/{})",
                utilization * 100.0,
                sample.in_use,
                sample.max
            );
        }
    }
}
