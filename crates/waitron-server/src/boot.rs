//! Boot descriptors for net-booting machines, looked up by MAC

use std::sync::Arc;
use tracing::info;
use waitron_common::{BuildStatus, normalize_mac};
use waitron_pixie::{BootDescriptor, DescriptorGenerator};

use crate::error::{Result, WaitronError};
use crate::registry::StateRegistry;

#[derive(Clone)]
pub struct BootDescriptorProvider {
    registry: Arc<StateRegistry>,
    generator: Arc<DescriptorGenerator>,
}

impl BootDescriptorProvider {
    pub fn new(registry: Arc<StateRegistry>, generator: Arc<DescriptorGenerator>) -> Self {
        Self { registry, generator }
    }

    /// Descriptor for the machine owning `mac`. Serving it marks the build as installing.
    pub fn descriptor(&self, mac: &str) -> Result<BootDescriptor> {
        let machine = self
            .registry
            .lookup_by_mac(mac)?
            .ok_or_else(|| WaitronError::NotBuilding(normalize_mac(mac)))?;

        let descriptor = self.generator.generate(&machine)?;
        self.registry
            .advance_status(&machine.token, BuildStatus::Installing)?;

        info!(
            hostname = %machine.hostname(),
            mac = %normalize_mac(mac),
            rescue = machine.rescue,
            "Serving boot descriptor"
        );
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_definition;
    use waitron_common::{BootImage, Machine, StaleBuildPolicy};
    use waitron_pixie::PixieConfig;

    fn provider() -> (BootDescriptorProvider, Arc<StateRegistry>) {
        let registry = Arc::new(StateRegistry::new());
        let generator = Arc::new(DescriptorGenerator::new(PixieConfig::new("http://waitron:9090")));
        (BootDescriptorProvider::new(registry.clone(), generator), registry)
    }

    fn machine(rescue: bool) -> Machine {
        let mut def = test_definition("web01", "AA-BB-CC-DD-EE-01");
        def.rescue_boot = Some(BootImage {
            image_url: "http://mirror/rescue".to_string(),
            kernel: "vmlinuz".to_string(),
            initrd: vec!["rescue.img".to_string()],
            cmdline: "rescue token={{ token }}".to_string(),
        });
        Machine::new(def, StaleBuildPolicy::default(), rescue)
    }

    #[test]
    fn test_unknown_mac_is_not_building() {
        let (provider, _) = provider();
        assert!(matches!(
            provider.descriptor("aa:bb:cc:dd:ee:99"),
            Err(WaitronError::NotBuilding(_))
        ));
    }

    #[test]
    fn test_descriptor_advances_status() {
        let (provider, registry) = provider();
        let token = registry.register(machine(false)).unwrap().token;

        let descriptor = provider.descriptor("aa:bb:cc:dd:ee:01").unwrap();
        assert_eq!(descriptor.kernel, "http://mirror/installer/linux");
        assert_eq!(descriptor.initrd, vec!["http://mirror/installer/initrd.gz"]);

        let m = registry.lookup_by_token(&token).unwrap().unwrap();
        assert_eq!(m.status, BuildStatus::Installing);
    }

    #[test]
    fn test_rescue_changes_descriptor_not_binding() {
        let (provider, registry) = provider();
        registry.register(machine(false)).unwrap();
        let normal = provider.descriptor("aa:bb:cc:dd:ee:01").unwrap();

        let token = registry.register(machine(true)).unwrap().token;
        let rescue = provider.descriptor("aa-bb-cc-dd-ee-01").unwrap();

        assert_ne!(normal.kernel, rescue.kernel);
        assert_eq!(rescue.kernel, "http://mirror/rescue/vmlinuz");
        assert_eq!(rescue.cmdline, format!("rescue token={}", token));

        let by_host = registry.lookup_by_hostname("web01").unwrap().unwrap();
        assert_eq!(by_host.token, token);
        assert!(by_host.rescue);
    }
}
