//! YAML manifests on disk
//!
//! `<machine_path>/<hostname>.yaml` describes a machine. It is layered over
//! `<group_path>/<domain>.yaml` and then over the service-wide defaults.
//! VMs live in `<vm_path>/<hostname>.yaml`. Both `.yaml` and `.yml` are accepted.

use super::{DefinitionError, DefinitionSource, MachineManifest, Result, is_safe_hostname};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use waitron_common::{MachineDefinition, VmDefinition};

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Definitions read from the manifest directories on every request
#[derive(Debug, Clone)]
pub struct FileDefinitionSource {
    machine_path: PathBuf,
    group_path: Option<PathBuf>,
    vm_path: Option<PathBuf>,
    hooks_path: Option<PathBuf>,
    defaults: MachineManifest,
}

impl FileDefinitionSource {
    pub fn new(machine_path: impl Into<PathBuf>, defaults: MachineManifest) -> Self {
        Self {
            machine_path: machine_path.into(),
            group_path: None,
            vm_path: None,
            hooks_path: None,
            defaults,
        }
    }

    pub fn with_group_path(mut self, path: Option<PathBuf>) -> Self {
        self.group_path = path;
        self
    }

    pub fn with_vm_path(mut self, path: Option<PathBuf>) -> Self {
        self.vm_path = path;
        self
    }

    pub fn with_hooks_path(mut self, path: Option<PathBuf>) -> Self {
        self.hooks_path = path;
        self
    }
}

/// Load `<dir>/<name>.yaml` (or `.yml`). A missing file is `Ok(None)`.
async fn read_manifest<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Option<T>> {
    for ext in EXTENSIONS {
        let path = dir.join(format!("{}.{}", name, ext));
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Loaded manifest");
        return serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|source| DefinitionError::Parse {
                path: path.display().to_string(),
                source,
            });
    }
    Ok(None)
}

/// Domain declared by the manifest, else everything after the first dot
fn domain_of(hostname: &str, manifest: &MachineManifest) -> Option<String> {
    manifest.domain.clone().or_else(|| {
        hostname
            .split_once('.')
            .map(|(_, domain)| domain.to_string())
            .filter(|domain| !domain.is_empty())
    })
}

#[async_trait]
impl DefinitionSource for FileDefinitionSource {
    async fn resolve_by_hostname(&self, hostname: &str) -> Result<MachineDefinition> {
        if !is_safe_hostname(hostname) {
            return Err(DefinitionError::NotFound(hostname.to_string()));
        }

        let mut machine: MachineManifest = read_manifest(&self.machine_path, hostname)
            .await?
            .ok_or_else(|| DefinitionError::NotFound(hostname.to_string()))?;

        let domain = domain_of(hostname, &machine);
        machine.domain = domain.clone();

        let group = match (&self.group_path, domain) {
            (Some(dir), Some(domain)) if is_safe_hostname(&domain) => {
                read_manifest::<MachineManifest>(dir, &domain).await?
            }
            _ => None,
        };

        let base = match group {
            Some(group) => group.layered_over(&self.defaults),
            None => self.defaults.clone(),
        };

        Ok(machine.layered_over(&base).into_definition(hostname))
    }

    async fn resolve_by_vm_hostname(&self, hostname: &str) -> Result<VmDefinition> {
        let not_found = || DefinitionError::NotFound(hostname.to_string());
        let dir = self.vm_path.as_ref().ok_or_else(not_found)?;
        if !is_safe_hostname(hostname) {
            return Err(not_found());
        }

        let mut vm: VmDefinition = read_manifest(dir, hostname).await?.ok_or_else(not_found)?;
        vm.hostname = hostname.to_string();
        Ok(vm)
    }

    async fn list_definitions(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.machine_path).await?;
        let mut hostnames = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_manifest = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if !is_manifest {
                continue;
            }
            // Follows symlinks; a dangling link is not a definition
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Skipping dangling manifest symlink");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                hostnames.push(stem.to_string());
            }
        }

        hostnames.sort();
        hostnames.dedup();
        Ok(hostnames)
    }

    async fn list_hooks(&self) -> Result<Vec<String>> {
        Ok(crate::hooks::list_hooks(self.hooks_path.as_deref()).await?)
    }
}
