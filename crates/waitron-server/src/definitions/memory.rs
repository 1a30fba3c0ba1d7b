//! In-memory definition source
//!
//! Useful for testing and embedding. Definitions are stored as given; no
//! layering is applied.

use super::{DefinitionError, DefinitionSource, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use waitron_common::{MachineDefinition, VmDefinition};

#[derive(Debug, Clone, Default)]
pub struct MemoryDefinitionSource {
    machines: BTreeMap<String, MachineDefinition>,
    vms: BTreeMap<String, VmDefinition>,
    hooks: Vec<String>,
}

impl MemoryDefinitionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_machine(mut self, definition: MachineDefinition) -> Self {
        self.machines.insert(definition.hostname.clone(), definition);
        self
    }

    pub fn with_vm(mut self, definition: VmDefinition) -> Self {
        self.vms.insert(definition.hostname.clone(), definition);
        self
    }

    pub fn with_hook(mut self, name: impl Into<String>) -> Self {
        self.hooks.push(name.into());
        self
    }
}

#[async_trait]
impl DefinitionSource for MemoryDefinitionSource {
    async fn resolve_by_hostname(&self, hostname: &str) -> Result<MachineDefinition> {
        self.machines
            .get(hostname)
            .cloned()
            .ok_or_else(|| DefinitionError::NotFound(hostname.to_string()))
    }

    async fn resolve_by_vm_hostname(&self, hostname: &str) -> Result<VmDefinition> {
        self.vms
            .get(hostname)
            .cloned()
            .ok_or_else(|| DefinitionError::NotFound(hostname.to_string()))
    }

    async fn list_definitions(&self) -> Result<Vec<String>> {
        Ok(self.machines.keys().cloned().collect())
    }

    async fn list_hooks(&self) -> Result<Vec<String>> {
        Ok(self.hooks.clone())
    }
}
