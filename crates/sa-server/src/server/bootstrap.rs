//! Startup sequencing and teardown.
//!
//! Everything up to the first accepted RPC happens in [`run`] in a fixed
//! order. Any failure on the way is returned with context and no RPC is ever
//! served. Once serving, the process ends when the serve loop returns,
//! which after a termination signal is only once in-flight RPCs are done.

use crate::server::config::{DbConfig, ServerConfig};
use crate::server::debug;
use crate::server::grpc::{GrpcServer, metrics::ServerMetrics, tls};
use crate::server::lifecycle::serve::serve_until_stopped;
use crate::server::lifecycle::signals::{TerminationSignals, spawn_signal_listener};
use crate::server::lifecycle::{Lifecycle, LifecycleState};
use crate::server::service::{AuthorityContext, StorageAuthority};
use anyhow::Context;
use sa_core::reporter::DEFAULT_REPORT_INTERVAL;
use sa_core::{DbPool, FeatureSet, Governor, HealthReporter, MetricsScope, SystemClock};
use std::sync::Arc;
use tonic::service::RoutesBuilder;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Builds and runs the service hosting `A` until it stops.
pub async fn run<A: StorageAuthority>(
    config: ServerConfig,
    lifecycle: Lifecycle,
) -> anyhow::Result<()> {
    let res = start::<A>(config, &lifecycle).await;
    lifecycle.advance(LifecycleState::Stopped);
    res
}

async fn start<A: StorageAuthority>(
    config: ServerConfig,
    lifecycle: &Lifecycle,
) -> anyhow::Result<()> {
    let features =
        FeatureSet::from_map(&config.features).context("Failed to set feature flags")?;

    tracing::info!(
        grpc_addr = %config.grpc.address,
        "Versions: sa-server={}",
        env!("CARGO_PKG_VERSION")
    );

    let metrics = MetricsScope::new().context("Failed to create metrics registry")?;
    let tracker = TaskTracker::new();
    let background = CancellationToken::new();
    // Stops the reporter and debug server on every exit path.
    let _background_guard = background.clone().drop_guard();

    let url = config.db.url().context("Couldn't load DB URL")?;
    let pool = DbPool::connect(&url, config.db.max_db_conns)
        .await
        .context("Couldn't connect to SA database")?;

    let governor = wire_backend(
        &pool,
        &config.db,
        config.parallelism_per_rpc,
        &metrics,
        &tracker,
        background.clone(),
    )?;

    let authority = A::build(AuthorityContext {
        pool: pool.clone(),
        clock: Arc::new(SystemClock),
        metrics: metrics.clone(),
        governor,
        features,
    })
    .context("Failed to create SA impl")?;

    let tls = match &config.tls {
        Some(tls_config) => Some(tls::load(tls_config).await.context("TLS config")?),
        None => None,
    };
    let server_metrics = ServerMetrics::new(&metrics).context("Unable to setup SA gRPC server")?;
    let builder = GrpcServer::bind(&config.grpc, tls, &server_metrics)
        .await
        .context("Unable to setup SA gRPC server")?;

    let mut routes = RoutesBuilder::default();
    authority.register(&mut routes);
    let server = builder.register(routes.routes());

    if let Some(addr) = &config.debug_addr {
        let listener = debug::bind(addr).await?;
        tracing::info!("Debug server listening on {addr}");
        debug::spawn(
            listener,
            debug::router(metrics.clone(), lifecycle.clone()),
            &tracker,
            background.clone(),
        );
    }

    let signals = TerminationSignals::install().context("Failed to install signal handlers")?;
    spawn_signal_listener(signals, lifecycle.clone(), &tracker);

    announce_serving(
        Arc::new(authority),
        lifecycle.shutdown_token(),
        background.clone(),
        server_metrics,
        &tracker,
    )
    .await;
    tracing::info!("SA gRPC server listening on {}", server.local_addr()?);
    let res = serve_until_stopped(server, lifecycle).await;

    background.cancel();
    tracker.close();
    pool.close().await;

    res.context("SA gRPC service failed")
}

/// Starts pool health reporting, applies the idle cap and derives the
/// per-RPC parallelism policy.
pub fn wire_backend(
    pool: &DbPool,
    db: &DbConfig,
    parallelism_per_rpc: i64,
    metrics: &MetricsScope,
    tracker: &TaskTracker,
    shutdown: CancellationToken,
) -> anyhow::Result<Governor> {
    HealthReporter::new(pool.clone(), metrics, DEFAULT_REPORT_INTERVAL)
        .context("Failed to register DB pool metrics")?
        .spawn(tracker, shutdown);

    pool.set_max_idle(db.max_idle_db_conns)
        .context("Failed to set idle connection limit")?;

    let governor = Governor::new(parallelism_per_rpc);
    tracing::info!(
        max_connections = pool.max_connections(),
        max_idle = ?pool.max_idle(),
        parallelism_per_rpc = governor.cap(),
        "Database backend ready"
    );
    Ok(governor)
}

/// Marks the authority as serving unless a drain is already under way, then
/// arranges for it to be marked not serving when the drain begins.
///
/// The watcher starts only after the `true` update has been published, so a
/// drain can never be overtaken by it.
async fn announce_serving<A: StorageAuthority>(
    authority: Arc<A>,
    drain: CancellationToken,
    background: CancellationToken,
    server_metrics: ServerMetrics,
    tracker: &TaskTracker,
) {
    if !drain.is_cancelled() {
        authority.set_serving(true).await;
    }
    spawn_drain_watcher(authority, drain, background, server_metrics, tracker);
}

/// Flips the authority to not serving as soon as the drain begins.
fn spawn_drain_watcher<A: StorageAuthority>(
    authority: Arc<A>,
    drain: CancellationToken,
    background: CancellationToken,
    server_metrics: ServerMetrics,
    tracker: &TaskTracker,
) {
    tracker.spawn(async move {
        tokio::select! {
            () = drain.cancelled() => {
                authority.set_serving(false).await;
                tracing::info!(
                    in_flight = server_metrics.in_flight(),
                    "Draining in-flight RPCs"
                );
            }
            () = background.cancelled() => {}
        }
    });
}
