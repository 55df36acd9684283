//! ClickHouse client wrapper.

use crate::config::ClickHouseConfig;
use clickhouse::Client;
use pipeline_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// ClickHouse client bound to the configured database.
#[derive(Clone)]
pub struct ClickHouseClient {
    inner: Client,
    config: ClickHouseConfig,
}

impl ClickHouseClient {
    pub fn new(config: ClickHouseConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(Error::config("clickhouse.url must not be empty"));
        }

        let inner = Self::base_client(&config).with_database(&config.database);

        info!(
            url = %config.url,
            database = %config.database,
            "Created ClickHouse client"
        );

        Ok(Self { inner, config })
    }

    fn base_client(config: &ClickHouseConfig) -> Client {
        let mut client = Client::default().with_url(&config.url);

        if let Some(ref user) = config.username {
            client = client.with_user(user);
        }
        if let Some(ref pass) = config.password {
            client = client.with_password(pass);
        }
        client
    }

    /// Client bound to the configured database.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    /// Client without a database, for DDL that creates it.
    pub fn server(&self) -> Client {
        Self::base_client(&self.config)
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// Runs a ClickHouse operation under the configured timeout, mapping
    /// failures to `Error::Store`.
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, clickhouse::error::Error>>,
    {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::store(format!("{} failed: {}", op, e))),
            Err(_) => Err(Error::store(format!(
                "{} timed out after {}s",
                op, self.config.timeout_secs
            ))),
        }
    }
}
