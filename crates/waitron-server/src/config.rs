//! Service configuration
//!
//! A single YAML file. Directory keys use the historical lowercase spelling
//! (`templatepath`, `machinepath`, ...). Every machine manifest key is also
//! accepted at the top level as a service-wide default.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use waitron_common::StaleBuildPolicy;
use waitron_pixie::PixieConfig;

use crate::definitions::{FileDefinitionSource, MachineManifest};

const DEFAULT_CHECK_FREQUENCY_SECS: u64 = 300;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "templatepath")]
    pub template_path: PathBuf,

    #[serde(rename = "machinepath")]
    pub machine_path: PathBuf,

    /// Per-domain defaults, `<grouppath>/<domain>.yaml`
    #[serde(rename = "grouppath", default)]
    pub group_path: Option<PathBuf>,

    #[serde(rename = "vmpath", default)]
    pub vm_path: Option<PathBuf>,

    #[serde(rename = "hookspath", default)]
    pub hooks_path: Option<PathBuf>,

    /// Served under `/files/` when set
    #[serde(rename = "staticspath", default)]
    pub statics_path: Option<PathBuf>,

    #[serde(rename = "baseurl", default)]
    pub base_url: String,

    /// Seconds between stale build sweeps; 0 means the default
    #[serde(default)]
    pub stale_build_check_frequency_secs: u64,

    /// Appended to every boot command line
    #[serde(default)]
    pub kernel_params: Vec<String>,

    #[serde(default)]
    pub console: Option<String>,

    #[serde(flatten)]
    pub defaults: MachineManifest,
}

impl Config {
    /// Read and validate the config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.template_path.as_os_str().is_empty() {
            bail!("templatepath must be set");
        }
        if self.machine_path.as_os_str().is_empty() {
            bail!("machinepath must be set");
        }
        Ok(())
    }

    pub fn stale_build_check_interval(&self) -> Duration {
        match self.stale_build_check_frequency_secs {
            0 => Duration::from_secs(DEFAULT_CHECK_FREQUENCY_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Policy for machines whose definition carries none
    pub fn default_stale_policy(&self) -> StaleBuildPolicy {
        let defaults = StaleBuildPolicy::default();
        StaleBuildPolicy {
            threshold_secs: self
                .defaults
                .stale_build_threshold_secs
                .unwrap_or(defaults.threshold_secs),
            commands: self.defaults.stale_build_commands.clone().unwrap_or_default(),
        }
    }

    pub fn pixie_config(&self) -> PixieConfig {
        let mut pixie = PixieConfig::new(self.base_url.clone());
        for param in &self.kernel_params {
            pixie = pixie.with_kernel_param(param.clone());
        }
        if let Some(ref console) = self.console {
            pixie = pixie.with_console(console.clone());
        }
        pixie
    }

    pub fn definition_source(&self) -> FileDefinitionSource {
        FileDefinitionSource::new(&self.machine_path, self.defaults.clone())
            .with_group_path(self.group_path.clone())
            .with_vm_path(self.vm_path.clone())
            .with_hooks_path(self.hooks_path.clone())
    }
}
