pub mod backend;
pub mod config;
pub mod error;
pub mod frame;
pub mod generators;
pub mod http_client;
pub mod merge;
pub mod model;
pub mod normalizer;
pub mod session;
pub mod store;
pub mod telemetry;
