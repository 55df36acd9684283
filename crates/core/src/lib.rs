//! Core types, errors, and validation for the sensor pipeline.

pub mod activity;
pub mod error;
pub mod limits;
pub mod reading;
pub mod retention;
pub mod sensor;

pub use activity::*;
pub use error::{Error, Result};
pub use reading::*;
pub use retention::*;
pub use sensor::*;
