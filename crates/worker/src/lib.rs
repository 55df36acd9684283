//! Background workers for the sensor pipeline.
//!
//! - Inference pool (queue → model registry → store)
//! - Pruning of silent devices
//! - Metrics snapshots and idle model eviction

pub mod config;
pub mod consumer;
pub mod pool;
pub mod retention;
pub mod scheduler;

pub use config::WorkerConfig;
pub use consumer::*;
pub use pool::InferencePool;
pub use retention::*;
pub use scheduler::*;
