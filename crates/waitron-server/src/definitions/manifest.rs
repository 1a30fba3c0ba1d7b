//! The on-disk manifest format
//!
//! Machine files, group files and the service config all share this flat
//! layout. Every field is optional so layers can be merged before the result
//! is turned into a [`MachineDefinition`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use waitron_common::{BootImage, Interface, MachineDefinition, StaleBuildPolicy};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operatingsystem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<Interface>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preseed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initrd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescue_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescue_kernel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescue_initrd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescue_cmdline: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_build_threshold_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_build_commands: Option<Vec<String>>,
}

impl MachineManifest {
    /// Fill every unset field from `base`. Params merge key by key, ours winning.
    pub fn layered_over(self, base: &MachineManifest) -> MachineManifest {
        let mut params = base.params.clone();
        params.extend(self.params);

        MachineManifest {
            hostname: self.hostname.or_else(|| base.hostname.clone()),
            domain: self.domain.or_else(|| base.domain.clone()),
            operatingsystem: self.operatingsystem.or_else(|| base.operatingsystem.clone()),
            network: self.network.or_else(|| base.network.clone()),
            roles: self.roles.or_else(|| base.roles.clone()),
            disks: self.disks.or_else(|| base.disks.clone()),
            virtual_network: self.virtual_network.or_else(|| base.virtual_network.clone()),
            cloud_init: self.cloud_init.or_else(|| base.cloud_init.clone()),
            preseed: self.preseed.or_else(|| base.preseed.clone()),
            finish: self.finish.or_else(|| base.finish.clone()),
            params,
            image_url: self.image_url.or_else(|| base.image_url.clone()),
            kernel: self.kernel.or_else(|| base.kernel.clone()),
            initrd: self.initrd.or_else(|| base.initrd.clone()),
            cmdline: self.cmdline.or_else(|| base.cmdline.clone()),
            rescue_image_url: self.rescue_image_url.or_else(|| base.rescue_image_url.clone()),
            rescue_kernel: self.rescue_kernel.or_else(|| base.rescue_kernel.clone()),
            rescue_initrd: self.rescue_initrd.or_else(|| base.rescue_initrd.clone()),
            rescue_cmdline: self.rescue_cmdline.or_else(|| base.rescue_cmdline.clone()),
            stale_build_threshold_secs: self
                .stale_build_threshold_secs
                .or(base.stale_build_threshold_secs),
            stale_build_commands: self
                .stale_build_commands
                .or_else(|| base.stale_build_commands.clone()),
        }
    }

    fn has_rescue_image(&self) -> bool {
        self.rescue_kernel.is_some() || self.rescue_initrd.is_some()
    }

    /// Build the definition for `hostname`.
    ///
    /// The hostname argument wins over any `hostname` key so a file can never
    /// describe a machine other than the one it was looked up for.
    pub fn into_definition(self, hostname: &str) -> MachineDefinition {
        let rescue_boot = self.has_rescue_image().then(|| BootImage {
            image_url: self.rescue_image_url.clone().unwrap_or_default(),
            kernel: self.rescue_kernel.clone().unwrap_or_default(),
            initrd: self.rescue_initrd.clone().unwrap_or_default(),
            cmdline: self.rescue_cmdline.clone().unwrap_or_default(),
        });

        let stale_build = (self.stale_build_threshold_secs.is_some()
            || self.stale_build_commands.is_some())
        .then(|| {
            let defaults = StaleBuildPolicy::default();
            StaleBuildPolicy {
                threshold_secs: self
                    .stale_build_threshold_secs
                    .unwrap_or(defaults.threshold_secs),
                commands: self.stale_build_commands.clone().unwrap_or_default(),
            }
        });

        MachineDefinition {
            hostname: hostname.to_string(),
            domain: self.domain.unwrap_or_default(),
            operating_system: self.operatingsystem.unwrap_or_default(),
            network: self.network.unwrap_or_default(),
            roles: self.roles.unwrap_or_default(),
            disks: self.disks.unwrap_or_default(),
            virtual_network: self.virtual_network,
            cloud_init: self.cloud_init.unwrap_or_default(),
            preseed: self.preseed.unwrap_or_default(),
            finish: self.finish.unwrap_or_default(),
            params: self.params,
            boot: BootImage {
                image_url: self.image_url.unwrap_or_default(),
                kernel: self.kernel.unwrap_or_default(),
                initrd: self.initrd.unwrap_or_default(),
                cmdline: self.cmdline.unwrap_or_default(),
            },
            rescue_boot,
            stale_build,
        }
    }
}
