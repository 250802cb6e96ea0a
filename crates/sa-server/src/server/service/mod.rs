//! The seam between the host process and the business logic it serves.
//!
//! The host owns everything with a process lifetime (pool, metrics,
//! parallelism policy, feature flags) and passes it to the collaborator once
//! through [`AuthorityContext`]. The collaborator contributes gRPC services
//! and is told when the host stops serving.

pub mod health;

use sa_core::{Clock, DbPool, FeatureSet, Governor, MetricsScope};
use std::sync::Arc;
use tonic::service::RoutesBuilder;

/// Process-lifetime dependencies handed to the storage authority.
#[derive(Clone)]
pub struct AuthorityContext {
    pub pool: DbPool,
    pub clock: Arc<dyn Clock>,
    pub metrics: MetricsScope,
    pub governor: Governor,
    pub features: FeatureSet,
}

/// The business-logic collaborator hosted by this binary.
pub trait StorageAuthority: Sized + Send + Sync + 'static {
    /// Builds the authority from its dependencies.
    fn build(ctx: AuthorityContext) -> anyhow::Result<Self>;

    /// Adds the authority's gRPC services.
    fn register(&self, routes: &mut RoutesBuilder);

    /// Called with `true` once the server accepts RPCs and with `false` as
    /// soon as the drain begins.
    fn set_serving(&self, serving: bool) -> impl Future<Output = ()> + Send;
}
