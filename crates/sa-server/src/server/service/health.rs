use super::{AuthorityContext, StorageAuthority};
use metrics::Gauge;
use portable_atomic::{AtomicBool, Ordering};
use sa_core::{Clock, DbPool};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tonic::service::RoutesBuilder;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;

/// Name under which the authority reports its health.
pub const SERVICE_NAME: &str = "sa.StorageAuthority";

pub const SERVING_GAUGE: &str = "sa_serving";

type Install = Box<dyn Fn(&mut RoutesBuilder) + Send + Sync>;

/// Authority that serves only `grpc.health.v1.Health`.
///
/// It reports `SERVING` for [`SERVICE_NAME`] and for the server as a whole
/// while the host is serving and the pool is open, `NOT_SERVING` otherwise.
pub struct HealthAuthority {
    pool: DbPool,
    clock: Arc<dyn Clock>,
    reporter: HealthReporter,
    install: Install,
    serving: AtomicBool,
    serving_gauge: Gauge,
}

impl HealthAuthority {
    /// The status most recently published.
    pub fn status(&self) -> ServingStatus {
        if self.serving.load(Ordering::Acquire) {
            ServingStatus::Serving
        } else {
            ServingStatus::NotServing
        }
    }
}

impl StorageAuthority for HealthAuthority {
    fn build(ctx: AuthorityContext) -> anyhow::Result<Self> {
        let (reporter, service) = tonic_health::server::health_reporter();
        let install: Install = Box::new(move |routes| {
            routes.add_service(service.clone());
        });

        let serving_gauge = ctx
            .metrics
            .gauge(SERVING_GAUGE, "Whether the storage authority is serving (1) or not (0).")?;

        let enabled: Vec<&str> = ctx.features.iter().map(|f| f.as_str()).collect();
        tracing::debug!(?enabled, parallelism = ctx.governor.cap(), "Health authority built");

        Ok(Self {
            pool: ctx.pool,
            clock: ctx.clock,
            reporter,
            install,
            serving: AtomicBool::new(false),
            serving_gauge,
        })
    }

    fn register(&self, routes: &mut RoutesBuilder) {
        (self.install)(routes);
    }

    async fn set_serving(&self, serving: bool) {
        let serving = serving && !self.pool.is_closed();
        self.serving.store(serving, Ordering::Release);
        self.serving_gauge.set(if serving { 1.0 } else { 0.0 });

        let status = self.status();
        self.reporter.set_service_status(SERVICE_NAME, status).await;
        self.reporter.set_service_status("", status).await;

        let at = self
            .clock
            .now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        tracing::info!(service = SERVICE_NAME, ?status, at, "Health status updated");
    }
}
