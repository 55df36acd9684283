//! Pipeline health signals.
//!
//! Two components are tracked: the queue (can producers hand readings
//! over?) and the store (are scored readings being persisted?). A dead queue
//! stops the pipeline; a dead store leaves it running but dropping work.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Overall pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Readings are accepted but not persisted
    Degraded,
    /// Readings cannot be accepted
    Unhealthy,
}

impl HealthStatus {
    pub fn accepts_readings(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

#[derive(Debug, Clone)]
struct ComponentState {
    healthy: bool,
    reason: Option<String>,
    since: DateTime<Utc>,
}

/// Health of one pipeline component. Starts unhealthy until a check passes.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    state: RwLock<Option<ComponentState>>,
}

impl ComponentHealth {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(None),
        }
    }

    pub fn set_healthy(&self) {
        self.transition(true, None);
    }

    pub fn set_unhealthy(&self, reason: impl Into<String>) {
        self.transition(false, Some(reason.into()));
    }

    /// `since` only moves when the healthy flag flips.
    fn transition(&self, healthy: bool, reason: Option<String>) {
        let mut state = self.state.write();
        let since = match state.as_ref() {
            Some(prev) if prev.healthy == healthy => prev.since,
            _ => Utc::now(),
        };
        *state = Some(ComponentState {
            healthy,
            reason,
            since,
        });
    }

    pub fn is_healthy(&self) -> bool {
        self.state.read().as_ref().is_some_and(|s| s.healthy)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn reason(&self) -> Option<String> {
        self.state.read().as_ref().and_then(|s| s.reason.clone())
    }

    fn report(&self) -> ComponentReport {
        let state = self.state.read();
        match state.as_ref() {
            Some(s) => ComponentReport {
                name: self.name.to_string(),
                healthy: s.healthy,
                reason: s.reason.clone(),
                since: Some(s.since),
            },
            None => ComponentReport {
                name: self.name.to_string(),
                healthy: false,
                reason: Some("not checked".to_string()),
                since: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub name: String,
    pub healthy: bool,
    pub reason: Option<String>,
    /// When the component last changed state
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub queue: ComponentReport,
    pub store: ComponentReport,
}

/// Health of the queue and store.
pub struct HealthRegistry {
    pub queue: ComponentHealth,
    pub store: ComponentHealth,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            queue: ComponentHealth::new("queue"),
            store: ComponentHealth::new("store"),
        }
    }

    pub fn status(&self) -> HealthStatus {
        if !self.queue.is_healthy() {
            HealthStatus::Unhealthy
        } else if !self.store.is_healthy() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.status(),
            queue: self.queue.report(),
            store: self.store.report(),
        }
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static HEALTH: LazyLock<HealthRegistry> = LazyLock::new(HealthRegistry::new);

/// Get the global health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
