//! Size and sanity limits for readings.
//!
//! The `#[validate]` derive macro requires literal values in attributes,
//! so field limits are duplicated on `Reading`. Keep both in sync when modifying.

/// Maximum device ID length (chars).
pub const MAX_DEVICE_ID_LEN: usize = 256;

/// Maximum sensor kind length (chars).
pub const MAX_SENSOR_KIND_LEN: usize = 64;

/// Maximum serialized reading size in bytes.
///
/// A reading is a handful of short fields; anything larger is not a reading.
pub const MAX_READING_BYTES: usize = 4 * 1024;

/// Maximum allowed clock skew for reading timestamps in the future (seconds).
pub const MAX_FUTURE_SKEW_SECS: i64 = 300;
