//! Library surface for the registry binary, split out so integration
//! tests can drive the `axum` router directly without a subprocess.

pub mod config;
pub mod error;
pub mod health_monitor;
pub mod server;
pub mod store;
