#![doc = include_str!("../README.md")]

mod clock;
mod error;
mod features;
pub mod governor;
pub mod pool;
mod registry;
pub mod reporter;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ConnectError, Error, Result};
pub use features::{Feature, FeatureSet};
pub use governor::{Governor, ParallelismToken, RequestLimiter};
pub use pool::{DbPool, PoolSample, PoolSampler, PooledConnection};
pub use registry::{CounterVec, GaugeVec, HistogramVec, MetricsScope};
pub use reporter::HealthReporter;
