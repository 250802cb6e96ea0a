use super::*;
use axum::http::{Request, Response, StatusCode};
use core::convert::Infallible;
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use sa_core::MetricsScope;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tonic::transport::Endpoint;
use tower::ServiceExt;

fn health_routes() -> Routes {
    let (_reporter, health) = tonic_health::server::health_reporter();
    let mut builder = RoutesBuilder::default();
    builder.add_service(health);
    builder.routes()
}

async fn server(config: &GrpcConfig) -> GrpcServer {
    let scope = MetricsScope::new().unwrap();
    let metrics = ServerMetrics::new(&scope).unwrap();
    GrpcServer::bind(config, None, &metrics)
        .await
        .unwrap()
        .register(health_routes())
}

fn config() -> GrpcConfig {
    GrpcConfig {
        address: "127.0.0.1:0".to_string(),
        max_connection_age_secs: Some(30),
        timeout_secs: Some(5),
    }
}

#[tokio::test]
async fn refuses_to_start_once_stopped() {
    let server = server(&config()).await;
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    assert!(matches!(
        server.serve(shutdown).await,
        Err(ServeError::Stopped)
    ));
}

#[tokio::test]
async fn stops_gracefully_and_releases_the_listener() {
    let server = server(&config()).await;
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let client = async {
        TcpStream::connect(addr).await.unwrap();
        shutdown.cancel();
    };
    let (res, ()) = tokio::join!(server.serve(shutdown.clone()), client);
    res.unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn bind_reports_the_address() {
    let scope = MetricsScope::new().unwrap();
    let metrics = ServerMetrics::new(&scope).unwrap();
    let mut config = config();
    config.address = "not an address".to_string();

    let err = GrpcServer::bind(&config, None, &metrics)
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("not an address"), "{err}");
}

#[tokio::test]
async fn bind_happens_before_routes_are_registered() {
    let scope = MetricsScope::new().unwrap();
    let metrics = ServerMetrics::new(&scope).unwrap();
    let builder = GrpcServer::bind(&config(), None, &metrics).await.unwrap();

    // Already accepting at the TCP level before any route exists.
    let server = builder.register(health_routes());
    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
}

/// Unary handler that signals when it starts and answers after a delay.
#[derive(Clone)]
struct SlowService {
    entered: mpsc::UnboundedSender<()>,
    delay: Duration,
}

impl NamedService for SlowService {
    const NAME: &'static str = "sa.test.Slow";
}

impl tower::Service<Request<Body>> for SlowService {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<Body>) -> Self::Future {
        let entered = self.entered.clone();
        let delay = self.delay;
        Box::pin(async move {
            let _ = entered.send(());
            tokio::time::sleep(delay).await;
            Ok(Response::builder()
                .header("content-type", "application/grpc")
                .header("grpc-status", "0")
                .body(Body::empty())
                .unwrap())
        })
    }
}

fn unary_call() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/sa.test.Slow/Call")
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn in_flight_rpc_completes_across_shutdown() {
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let mut routes = RoutesBuilder::default();
    routes.add_service(SlowService {
        entered: entered_tx,
        delay: Duration::from_millis(200),
    });

    let scope = MetricsScope::new().unwrap();
    let metrics = ServerMetrics::new(&scope).unwrap();
    let server = GrpcServer::bind(&config(), None, &metrics)
        .await
        .unwrap()
        .register(routes.routes());
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let client = async {
        let channel = Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect()
            .await
            .unwrap();

        let call = channel.oneshot(unary_call());
        let drain = async {
            entered_rx.recv().await.unwrap();
            shutdown.cancel();
        };
        let (response, ()) = tokio::join!(call, drain);

        let response = response.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["grpc-status"], "0");
    };

    let (res, ()) = tokio::join!(server.serve(shutdown.clone()), client);
    res.unwrap();
    assert!(shutdown.is_cancelled());
    assert_eq!(metrics.in_flight(), 0);

    // Nothing listens once the drain is over.
    assert!(TcpStream::connect(addr).await.is_err());
}
