//! ClickHouse health checks.

use crate::client::ClickHouseClient;
use crate::schema::{all_tables, create_database};
use pipeline_core::Result;
use tracing::{debug, error};

/// Check ClickHouse connection health.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    match client
        .run("health check", client.server().query("SELECT 1").fetch_one::<u8>())
        .await
    {
        Ok(_) => {
            debug!("ClickHouse connection healthy");
            true
        }
        Err(e) => {
            error!(error = %e, "ClickHouse health check failed");
            false
        }
    }
}

/// Creates the database and tables if missing.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    let ddl = create_database(&client.config().database);
    client
        .run("create database", client.server().query(&ddl).execute())
        .await?;

    for ddl in all_tables() {
        client
            .run("create table", client.inner().query(ddl).execute())
            .await?;
    }

    debug!(database = %client.config().database, "ClickHouse schema initialized");
    Ok(())
}
