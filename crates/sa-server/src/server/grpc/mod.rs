//! The gRPC transport: listener, TLS, per-RPC metrics and graceful stop.

pub mod metrics;
pub mod tls;

use crate::server::config::GrpcConfig;
use crate::server::lifecycle::serve::{Serve, ServeError};
use anyhow::Context;
use metrics::{RpcMetricsLayer, ServerMetrics};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::server::Router;
use tonic::transport::{Server, ServerTlsConfig};
use tower::layer::util::{Identity, Stack};

type Layered = Stack<RpcMetricsLayer, Identity>;

/// A configured, bound gRPC server waiting for its routes.
pub struct GrpcServerBuilder {
    server: Server<Layered>,
    listener: TcpListener,
}

/// A gRPC server bound to its listener, ready to serve.
pub struct GrpcServer {
    router: Router<Layered>,
    listener: TcpListener,
}

impl GrpcServer {
    /// Applies TLS, deadlines and connection ageing from `config` and binds
    /// the listen address. Port `0` picks a free port.
    pub async fn bind(
        config: &GrpcConfig,
        tls: Option<ServerTlsConfig>,
        metrics: &ServerMetrics,
    ) -> anyhow::Result<GrpcServerBuilder> {
        let mut server = Server::builder();
        if let Some(tls) = tls {
            server = server.tls_config(tls).context("TLS config")?;
        }
        if let Some(secs) = config.timeout_secs {
            server = server.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = config.max_connection_age_secs {
            server = server.max_connection_age(Duration::from_secs(secs));
        }

        let listener = TcpListener::bind(&config.address)
            .await
            .with_context(|| format!("binding gRPC listener on {}", config.address))?;

        Ok(GrpcServerBuilder {
            server: server.layer(metrics.layer()),
            listener,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl GrpcServerBuilder {
    /// Installs the services that will answer RPCs.
    pub fn register(mut self, routes: Routes) -> GrpcServer {
        GrpcServer {
            router: self.server.add_routes(routes),
            listener: self.listener,
        }
    }
}

impl Serve for GrpcServer {
    /// Serves until `shutdown` is cancelled, then stops accepting, lets
    /// in-flight RPCs finish and closes the listener.
    ///
    /// Returns [`ServeError::Stopped`] without serving anything if the stop
    /// was requested before serving began.
    async fn serve(self, shutdown: CancellationToken) -> Result<(), ServeError> {
        if shutdown.is_cancelled() {
            return Err(ServeError::Stopped);
        }

        let incoming = TcpListenerStream::new(self.listener);
        self.router
            .serve_with_incoming_shutdown(incoming, shutdown.cancelled_owned())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
