//! Provider health tracking
//!
//! Health is derived from reported errors and successes only. Each error
//! increments a counter, each success decrements it, and the status follows
//! the counter through the configured thresholds:
//!
//! - below `degraded_threshold`: healthy
//! - from `degraded_threshold`: degraded
//! - from `unhealthy_threshold`: unhealthy

use crate::types::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use switchboard_core::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderHealthStatus {
    pub status: HealthStatus,
    pub error_count: u32,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Status before and after a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub old: HealthStatus,
    pub new: HealthStatus,
}

impl HealthTransition {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

pub struct ProviderHealthTracker {
    config: HealthConfig,
    records: HashMap<ProviderId, ProviderHealthStatus>,
}

impl ProviderHealthTracker {
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
        }
    }

    /// Start tracking `provider` as healthy if it is not tracked yet
    pub fn track(&mut self, provider: &ProviderId) {
        self.records.entry(provider.clone()).or_default();
    }

    /// Drop the health record of an unregistered provider
    pub fn forget(&mut self, provider: &ProviderId) -> bool {
        self.records.remove(provider).is_some()
    }

    pub fn report_error(&mut self, provider: &ProviderId) -> HealthTransition {
        let config = self.config;
        let record = self.records.entry(provider.clone()).or_default();
        let old = record.status;
        record.error_count = record.error_count.saturating_add(1);
        record.status = status_for(&config, record.error_count);
        record.last_checked = Some(Utc::now());
        HealthTransition {
            old,
            new: record.status,
        }
    }

    pub fn report_success(&mut self, provider: &ProviderId) -> HealthTransition {
        let config = self.config;
        let record = self.records.entry(provider.clone()).or_default();
        let old = record.status;
        record.error_count = record.error_count.saturating_sub(1);
        record.status = status_for(&config, record.error_count);
        record.last_checked = Some(Utc::now());
        HealthTransition {
            old,
            new: record.status,
        }
    }

    /// Current status; providers never reported on count as healthy
    #[must_use]
    pub fn status(&self, provider: &ProviderId) -> HealthStatus {
        self.records
            .get(provider)
            .map_or(HealthStatus::Healthy, |r| r.status)
    }

    #[must_use]
    pub fn get(&self, provider: &ProviderId) -> Option<ProviderHealthStatus> {
        self.records.get(provider).cloned()
    }

    #[must_use]
    pub fn all(&self) -> HashMap<ProviderId, ProviderHealthStatus> {
        self.records.clone()
    }
}

fn status_for(config: &HealthConfig, error_count: u32) -> HealthStatus {
    if error_count >= config.unhealthy_threshold {
        HealthStatus::Unhealthy
    } else if error_count >= config.degraded_threshold {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
