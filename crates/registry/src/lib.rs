//! Anomaly model registry.
//!
//! One long-lived model per sensor kind, created on first use. Calls for the
//! same kind are serialized on that kind's handle; different kinds never
//! contend.

pub mod model;
pub mod registry;

pub use model::{AnomalyModel, ModelConfig, ModelScore, ZScoreModel};
pub use registry::{DefaultModelFactory, ModelFactory, ModelHandle, ModelRegistry, Verdict};
