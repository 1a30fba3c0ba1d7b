//! The Machine type - a host currently in build mode.

use crate::definition::{MachineDefinition, StaleBuildPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalize MAC address to lowercase with colons
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_lowercase().replace('-', ":")
}

/// Build progress as observed through boot and template requests.
///
/// Ordered: a build only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum BuildStatus {
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "installing")]
    Installing,
    #[serde(rename = "installed")]
    Installed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Unset => "",
            BuildStatus::Installing => "installing",
            BuildStatus::Installed => "installed",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine in build mode.
///
/// The definition is flattened on serialization so templates can refer to
/// `hostname`, `network`, `roles` etc. directly next to `token` and `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Machine {
    #[serde(flatten)]
    pub definition: MachineDefinition,
    pub token: String,
    pub status: BuildStatus,
    pub build_start: DateTime<Utc>,
    pub rescue: bool,
    pub stale_build_threshold_secs: u64,
    pub stale_build_commands: Vec<String>,
}

impl Machine {
    /// Create a build entity. The token is assigned on registration.
    pub fn new(definition: MachineDefinition, policy: StaleBuildPolicy, rescue: bool) -> Self {
        Self {
            definition,
            token: String::new(),
            status: BuildStatus::Unset,
            build_start: Utc::now(),
            rescue,
            stale_build_threshold_secs: policy.threshold_secs,
            stale_build_commands: policy.commands,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.definition.hostname
    }

    /// Normalized MAC addresses of every interface.
    pub fn macs(&self) -> Vec<String> {
        self.definition.mac_addresses().map(normalize_mac).collect()
    }

    /// Whole seconds since the build started; zero if the clock went backwards.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.build_start).num_seconds().max(0) as u64
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_secs(now) >= self.stale_build_threshold_secs
    }
}
