//! Machine and VM definitions.
//!
//! Definitions are loaded from manifests outside the core and never mutated
//! once resolved. The build entity ([`crate::Machine`]) embeds a copy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A network interface as declared in a machine manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Interface {
    pub name: String,
    #[serde(default, alias = "macaddress")]
    pub mac_address: String,
    #[serde(default, alias = "ipaddress")]
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default, alias = "dnsname")]
    pub dns_name: Option<String>,
}

/// Kernel, initrd set and command line template for one boot flavour.
///
/// `kernel` and `initrd` are relative to `image_url` unless they are full URLs.
/// `cmdline` is a template rendered against the build context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BootImage {
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub initrd: Vec<String>,
    #[serde(default)]
    pub cmdline: String,
}

impl BootImage {
    /// Whether the image carries what a net-booting machine needs.
    pub fn is_bootable(&self) -> bool {
        !self.kernel.trim().is_empty() && self.initrd.iter().any(|i| !i.trim().is_empty())
    }
}

/// How long a build may run and what to do once it is presumed stuck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaleBuildPolicy {
    pub threshold_secs: u64,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Default for StaleBuildPolicy {
    fn default() -> Self {
        Self {
            threshold_secs: 3600,
            commands: Vec::new(),
        }
    }
}

/// Immutable description of a physical machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MachineDefinition {
    pub hostname: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub network: Vec<Interface>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub disks: Vec<String>,
    #[serde(default)]
    pub virtual_network: Option<String>,
    #[serde(default)]
    pub cloud_init: Vec<String>,
    #[serde(default)]
    pub preseed: String,
    #[serde(default)]
    pub finish: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub boot: BootImage,
    #[serde(default)]
    pub rescue_boot: Option<BootImage>,
    #[serde(default)]
    pub stale_build: Option<StaleBuildPolicy>,
}

impl MachineDefinition {
    /// Short hostname (everything before the first dot).
    pub fn short_name(&self) -> &str {
        self.hostname.split('.').next().unwrap_or(&self.hostname)
    }

    /// MAC addresses of all declared interfaces, in declaration order.
    pub fn mac_addresses(&self) -> impl Iterator<Item = &str> {
        self.network
            .iter()
            .map(|iface| iface.mac_address.as_str())
            .filter(|mac| !mac.is_empty())
    }
}

/// A disk attached to a virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VmDisk {
    pub name: String,
    #[serde(default)]
    pub size: Option<String>,
}

/// Immutable description of a virtual machine.
///
/// Keys the model does not know about are kept in `extra` and echoed back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VmDefinition {
    pub hostname: String,
    #[serde(default)]
    pub cpus: Option<u32>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub disks: Vec<VmDisk>,
    #[serde(default)]
    pub network: Vec<Interface>,
    #[serde(default)]
    pub virtual_network: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}
