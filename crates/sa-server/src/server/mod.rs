pub mod bootstrap;
pub mod config;
pub mod debug;
pub mod grpc;
pub mod lifecycle;
pub mod service;
pub mod telemetry;
