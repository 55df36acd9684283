//! Redpanda health checks.

use tracing::{debug, error};

use crate::config::RedpandaConfig;
use crate::redpanda::client_builder;

/// Check Redpanda connection health and that the readings topic exists.
pub async fn check_connection(config: &RedpandaConfig) -> bool {
    let client = match client_builder(config).build().await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to Redpanda: {}", e);
            return false;
        }
    };

    match client.list_topics().await {
        Ok(topics) => {
            let found = topics.iter().any(|t| t.name == config.topic);
            if found {
                debug!(topics = topics.len(), topic = %config.topic, "Redpanda connection healthy");
            } else {
                error!(topic = %config.topic, "Readings topic does not exist");
            }
            found
        }
        Err(e) => {
            error!("Failed to list Redpanda topics: {}", e);
            false
        }
    }
}
