//! Sync health tracking
//!
//! The `SyncManager` updates component statuses as transport events arrive;
//! hosts read a serializable snapshot for diagnostics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Operational on a fallback path
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Snapshot of every component plus readiness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub ready: bool,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthReport {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }
        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Component names
pub mod components {
    pub const STREAMING: &str = "streaming";
    pub const POLLING: &str = "polling";
    pub const FEATURE_FLAGS: &str = "feature_flags";
    pub const TELEMETRY: &str = "telemetry";

    pub const ALL: [&str; 4] = [STREAMING, POLLING, FEATURE_FLAGS, TELEMETRY];
}

/// Shared health state, cheap to clone
#[derive(Debug, Clone)]
pub struct SyncHealth {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for SyncHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncHealth {
    /// Every known component starts healthy, readiness starts false
    pub fn new() -> Self {
        let components = components::ALL
            .iter()
            .map(|name| (name.to_string(), ComponentHealth::healthy()))
            .collect();
        Self {
            components: Arc::new(RwLock::new(components)),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    fn read_components(&self) -> RwLockReadGuard<'_, HashMap<String, ComponentHealth>> {
        match self.components.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_components(&self) -> RwLockWriteGuard<'_, HashMap<String, ComponentHealth>> {
        match self.components.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn update(&self, name: &str, health: ComponentHealth) {
        self.write_components().insert(name.to_string(), health);
    }

    pub fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy());
    }

    pub fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message));
    }

    pub fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message));
    }

    pub fn status_of(&self, name: &str) -> Option<ComponentStatus> {
        self.read_components().get(name).map(|health| health.status)
    }

    pub fn set_ready(&self, ready: bool) {
        let mut current = match self.ready.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *current = ready;
    }

    pub fn is_ready(&self) -> bool {
        match self.ready.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn report(&self) -> HealthReport {
        let components = self.read_components().clone();
        let status = HealthReport::compute_status(&components);
        HealthReport {
            status,
            ready: self.is_ready() && status.is_operational(),
            components,
        }
    }
}
