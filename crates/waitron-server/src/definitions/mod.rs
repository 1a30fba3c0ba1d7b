//! Sources of machine and VM definitions
//!
//! This module provides the `DefinitionSource` trait and two implementations:
//! - `FileDefinitionSource` - YAML manifests on disk, layered over group and service defaults
//! - `MemoryDefinitionSource` - In-memory definitions for testing

mod file;
mod manifest;
mod memory;

pub use file::FileDefinitionSource;
pub use manifest::MachineManifest;
pub use memory::MemoryDefinitionSource;

use crate::hooks::HookError;
use async_trait::async_trait;
use thiserror::Error;
use waitron_common::{MachineDefinition, VmDefinition};

/// Errors from definition lookups
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("no definition for {0}")]
    NotFound(String),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hook listing failed: {0}")]
    Hooks(#[from] HookError),
}

pub type Result<T> = std::result::Result<T, DefinitionError>;

/// Read-only access to the definitions Waitron can build
///
/// The trait is object-safe and can be used with `Arc<dyn DefinitionSource>`.
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Fully resolved definition for a physical machine
    async fn resolve_by_hostname(&self, hostname: &str) -> Result<MachineDefinition>;

    /// Definition for a virtual machine
    async fn resolve_by_vm_hostname(&self, hostname: &str) -> Result<VmDefinition>;

    /// Hostnames of every known machine, sorted
    async fn list_definitions(&self) -> Result<Vec<String>>;

    /// Available hooks as `<phase-dir>/<file>`
    async fn list_hooks(&self) -> Result<Vec<String>>;
}

/// Hostnames double as file names, so anything path-like never resolves
pub(crate) fn is_safe_hostname(hostname: &str) -> bool {
    !hostname.is_empty()
        && !hostname.starts_with('.')
        && !hostname.contains(['/', '\\'])
        && !hostname.contains("..")
}
