//! Boot descriptor generation
//!
//! Kernel and initrd locations are resolved against the image URL and the
//! command line is rendered as a MiniJinja template against the build.

use crate::error::{PixieError, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use waitron_common::{BootImage, Machine, MachineDefinition};

/// Which image set a build boots into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Installer image
    Normal,
    /// Alternate rescue image
    Rescue,
}

impl BootMode {
    pub fn from_rescue(rescue: bool) -> Self {
        if rescue {
            BootMode::Rescue
        } else {
            BootMode::Normal
        }
    }
}

/// The `{kernel, initrd, cmdline}` triple served to pixiecore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootDescriptor {
    pub kernel: String,
    pub initrd: Vec<String>,
    pub cmdline: String,
}

/// Configuration for descriptor generation
#[derive(Debug, Clone, Default)]
pub struct PixieConfig {
    /// Base URL of this Waitron instance, exposed to templates as `base_url`
    pub base_url: String,

    /// Parameters appended to every command line
    pub kernel_params: Vec<String>,

    /// Console configuration (e.g., "ttyS0,115200")
    pub console: Option<String>,
}

impl PixieConfig {
    /// Create a new config with base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set console configuration
    pub fn with_console(mut self, console: impl Into<String>) -> Self {
        self.console = Some(console.into());
        self
    }

    /// Add kernel parameter
    pub fn with_kernel_param(mut self, param: impl Into<String>) -> Self {
        self.kernel_params.push(param.into());
        self
    }
}

#[derive(Serialize)]
struct CmdlineContext<'a> {
    #[serde(flatten)]
    machine: &'a Machine,
    base_url: &'a str,
}

/// Boot descriptor generator
#[derive(Debug, Clone)]
pub struct DescriptorGenerator {
    config: PixieConfig,
}

impl DescriptorGenerator {
    /// Create a new descriptor generator
    pub fn new(config: PixieConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PixieConfig {
        &self.config
    }

    /// Check that a definition carries everything needed to boot in `mode`
    pub fn validate(&self, definition: &MachineDefinition, mode: BootMode) -> Result<()> {
        if definition.mac_addresses().next().is_none() {
            return Err(PixieError::MissingConfig(format!(
                "{} has no interface with a MAC address",
                definition.hostname
            )));
        }
        image_for(definition, mode)?;
        Ok(())
    }

    /// Generate the descriptor for a machine in build mode
    pub fn generate(&self, machine: &Machine) -> Result<BootDescriptor> {
        let image = image_for(&machine.definition, BootMode::from_rescue(machine.rescue))?;

        let kernel = resolve_url(&image.image_url, &image.kernel);
        let initrd = image
            .initrd
            .iter()
            .filter(|path| !path.trim().is_empty())
            .map(|path| resolve_url(&image.image_url, path))
            .collect();

        Ok(BootDescriptor {
            kernel,
            initrd,
            cmdline: self.render_cmdline(&image.cmdline, machine)?,
        })
    }

    /// Render the command line template and append configured parameters
    fn render_cmdline(&self, template: &str, machine: &Machine) -> Result<String> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let ctx = CmdlineContext {
            machine,
            base_url: &self.config.base_url,
        };
        let rendered = env.render_str(template, ctx)?;

        let mut params: Vec<String> = rendered.split_whitespace().map(str::to_string).collect();
        params.extend(self.config.kernel_params.iter().cloned());
        if let Some(ref console) = self.config.console {
            params.push(format!("console={}", console));
        }

        Ok(params.join(" "))
    }
}

/// Select the image for a boot mode, failing if it cannot boot
fn image_for(definition: &MachineDefinition, mode: BootMode) -> Result<&BootImage> {
    let image = match mode {
        BootMode::Normal => &definition.boot,
        BootMode::Rescue => definition.rescue_boot.as_ref().ok_or_else(|| {
            PixieError::MissingConfig(format!("{} has no rescue image", definition.hostname))
        })?,
    };

    if !image.is_bootable() {
        return Err(PixieError::MissingConfig(format!(
            "{} needs a kernel and at least one initrd",
            definition.hostname
        )));
    }
    Ok(image)
}

/// Join a path onto the image URL unless it is already a full URL
fn resolve_url(image_url: &str, path: &str) -> String {
    if path.contains("://") || image_url.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        image_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
