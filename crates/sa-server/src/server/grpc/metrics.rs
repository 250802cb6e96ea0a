//! Per-method RPC metrics.
//!
//! [`RpcMetricsLayer`] wraps every route of the gRPC server and records, per
//! method path:
//! - `grpc_server_handled_total`: RPCs that produced a response head
//! - `grpc_server_in_flight`: RPCs currently being handled
//! - `grpc_server_handling_seconds`: time to the response head
//!
//! The process-wide in-flight count is also kept in memory so the drain can
//! report how much work it is waiting on.

use axum::http::{Request, Response};
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use metrics::Gauge;
use portable_atomic::{AtomicU64, Ordering};
use sa_core::{CounterVec, GaugeVec, HistogramVec, MetricsScope};
use std::sync::Arc;
use std::time::Instant;
use tower::{Layer, Service};

pub const HANDLED_TOTAL: &str = "grpc_server_handled_total";
pub const IN_FLIGHT: &str = "grpc_server_in_flight";
pub const HANDLING_SECONDS: &str = "grpc_server_handling_seconds";

#[derive(Clone)]
pub struct ServerMetrics {
    handled: CounterVec,
    in_flight: GaugeVec,
    latency: HistogramVec,
    in_flight_total: Arc<AtomicU64>,
}

impl ServerMetrics {
    pub fn new(scope: &MetricsScope) -> sa_core::Result<Self> {
        Ok(Self {
            handled: scope.counter_vec(HANDLED_TOTAL, "Total number of RPCs completed on the server.")?,
            in_flight: scope.gauge_vec(IN_FLIGHT, "Number of RPCs currently being handled.")?,
            latency: scope.histogram_vec(
                HANDLING_SECONDS,
                "Time taken by the server to produce a response head.",
            )?,
            in_flight_total: Arc::new(AtomicU64::new(0)),
        })
    }

    /// RPCs started and not yet answered, across every method.
    pub fn in_flight(&self) -> u64 {
        self.in_flight_total.load(Ordering::Acquire)
    }

    pub fn layer(&self) -> RpcMetricsLayer {
        RpcMetricsLayer {
            metrics: self.clone(),
        }
    }

    fn start(&self, method: String) -> InFlight {
        let gauge = self.in_flight.with_labels(&[("method", method.clone())]);
        gauge.increment(1.0);
        self.in_flight_total.fetch_add(1, Ordering::AcqRel);
        InFlight {
            metrics: self.clone(),
            method,
            gauge,
            started: Instant::now(),
        }
    }
}

/// Counts one RPC as in flight until dropped, which also covers handlers
/// whose future is cancelled mid-request.
struct InFlight {
    metrics: ServerMetrics,
    method: String,
    gauge: Gauge,
    started: Instant,
}

impl InFlight {
    fn finish(self) {
        let labels = [("method", self.method.clone())];
        self.metrics.handled.with_labels(&labels).increment(1);
        self.metrics
            .latency
            .with_labels(&labels)
            .record(self.started.elapsed().as_secs_f64());
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.gauge.decrement(1.0);
        self.metrics.in_flight_total.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Clone)]
pub struct RpcMetricsLayer {
    metrics: ServerMetrics,
}

impl<S> Layer<S> for RpcMetricsLayer {
    type Service = RpcMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RpcMetrics {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RpcMetrics<S> {
    inner: S,
    metrics: ServerMetrics,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RpcMetrics<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let guard = self.metrics.start(req.uri().path().to_string());
        let fut = self.inner.call(req);
        Box::pin(async move {
            let res = fut.await;
            if res.is_ok() {
                guard.finish();
            }
            res
        })
    }
}
