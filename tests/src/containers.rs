//! Testcontainer setup for ClickHouse.

use std::time::Duration;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use timeseries_store::ClickHouseConfig;

/// Container handle for ClickHouse.
pub struct TestContainers {
    #[allow(dead_code)]
    container: Option<ContainerAsync<GenericImage>>,
    pub clickhouse: ClickHouseConfig,
}

impl TestContainers {
    /// Starts ClickHouse, or reuses the server named by
    /// `PIPELINE_TEST_CLICKHOUSE_URL` when set.
    pub async fn start() -> Self {
        if let Some(url) = std::env::var("PIPELINE_TEST_CLICKHOUSE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            return Self {
                container: None,
                clickhouse: ClickHouseConfig {
                    url,
                    database: std::env::var("PIPELINE_TEST_CLICKHOUSE_DB")
                        .unwrap_or_else(|_| "sensors_test".to_string()),
                    username: std::env::var("PIPELINE_TEST_CLICKHOUSE_USER").ok(),
                    password: std::env::var("PIPELINE_TEST_CLICKHOUSE_PASSWORD").ok(),
                    ..ClickHouseConfig::default()
                },
            };
        }

        let (container, url) = start_clickhouse().await;

        Self {
            container: Some(container),
            clickhouse: ClickHouseConfig {
                url,
                database: "sensors_test".to_string(),
                username: Some("default".to_string()),
                password: None,
                ..ClickHouseConfig::default()
            },
        }
    }
}

/// Starts a throwaway ClickHouse and returns it with its HTTP URL.
pub async fn start_clickhouse() -> (ContainerAsync<GenericImage>, String) {
    let image = GenericImage::new("clickhouse/clickhouse-server", "24.3")
        .with_wait_for(WaitFor::seconds(5))
        .with_exposed_port(8123.tcp())
        .with_env_var("CLICKHOUSE_DEFAULT_ACCESS_MANAGEMENT", "1")
        .with_env_var("CLICKHOUSE_USER", "default")
        .with_env_var("CLICKHOUSE_PASSWORD", "");

    let container = image.start().await.expect("Failed to start ClickHouse");

    let port = container.get_host_port_ipv4(8123).await.unwrap();
    let url = format!("http://127.0.0.1:{}", port);

    wait_for_http(&url, Duration::from_secs(60)).await;

    (container, url)
}

/// Polls ClickHouse's `/ping` until it answers `Ok.`.
async fn wait_for_http(url: &str, timeout: Duration) {
    let client = reqwest::Client::new();
    let ping = format!("{}/ping", url);
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if let Ok(resp) = client.get(&ping).send().await {
            if resp.status().is_success()
                && resp.text().await.is_ok_and(|body| body.trim() == "Ok.")
            {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("ClickHouse at {} not ready after {:?}", url, timeout);
}
