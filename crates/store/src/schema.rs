//! ClickHouse table schemas.
//!
//! - `device_id` leads the sort key so per-device reads and deletes touch few parts
//! - DateTime64(3) for millisecond precision
//! - LowCardinality for the closed set of sensor kinds and model versions

/// Name of the scored readings table.
pub const READINGS_TABLE: &str = "scored_readings";

/// SQL for creating the database.
pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", database)
}

/// SQL for creating the scored readings table.
pub const CREATE_READINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS scored_readings (
    reading_id String,
    device_id String,
    sensor_kind LowCardinality(String),
    value Float64,
    timestamp DateTime64(3),
    is_anomaly UInt8,
    score Float64,
    model_version LowCardinality(String),

    inserted_at DateTime DEFAULT now()
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY (device_id, timestamp, reading_id)
SETTINGS index_granularity = 8192
"#;

/// Table DDL in creation order.
pub fn all_tables() -> Vec<&'static str> {
    vec![CREATE_READINGS_TABLE]
}
