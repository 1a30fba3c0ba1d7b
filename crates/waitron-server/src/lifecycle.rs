//! Build lifecycle: entering build mode, completing and cancelling builds
//!
//! Every token-accepting call goes through [`LifecycleController::authorize`],
//! which distinguishes a wrong token from a machine that is not building.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use waitron_common::{BuildStatus, Machine, StaleBuildPolicy};
use waitron_pixie::{BootMode, DescriptorGenerator};

use crate::definitions::DefinitionSource;
use crate::error::{Result, WaitronError};
use crate::hooks::{HookExecutor, HookPhase};
use crate::registry::{Authorization, RegistryError, StateRegistry};

#[derive(Clone)]
pub struct LifecycleController {
    registry: Arc<StateRegistry>,
    definitions: Arc<dyn DefinitionSource>,
    hooks: HookExecutor,
    generator: Arc<DescriptorGenerator>,
    default_policy: StaleBuildPolicy,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<StateRegistry>,
        definitions: Arc<dyn DefinitionSource>,
        hooks: HookExecutor,
        generator: Arc<DescriptorGenerator>,
        default_policy: StaleBuildPolicy,
    ) -> Self {
        Self {
            registry,
            definitions,
            hooks,
            generator,
            default_policy,
        }
    }

    /// Put `hostname` in build mode and return the new token.
    ///
    /// A machine already building is replaced and its old token stops working.
    pub async fn set_build_mode(&self, hostname: &str, mode: BootMode) -> Result<String> {
        let definition = self.definitions.resolve_by_hostname(hostname).await?;

        self.generator
            .validate(&definition, mode)
            .map_err(|e| WaitronError::InvalidDefinition {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            })?;

        let policy = definition
            .stale_build
            .clone()
            .unwrap_or_else(|| self.default_policy.clone());
        let machine = Machine::new(definition, policy, mode == BootMode::Rescue);

        let registration = self.registry.register(machine).map_err(|e| match e {
            RegistryError::MacInUse { .. } => WaitronError::InvalidDefinition {
                hostname: hostname.to_string(),
                reason: e.to_string(),
            },
            other => WaitronError::Registry(other),
        })?;

        if let Some(previous) = registration.replaced {
            warn!(
                hostname = %hostname,
                abandoned_token = %previous.token,
                "Replaced an existing build; the previous token is no longer valid"
            );
        }
        info!(hostname = %hostname, rescue = mode == BootMode::Rescue, "Build mode set");

        Ok(registration.token)
    }

    /// Resolve a token for `hostname`, or say why it does not resolve
    pub fn authorize(&self, hostname: &str, token: &str) -> Result<Machine> {
        match self.registry.authorize(hostname, token)? {
            Authorization::Granted(machine) => Ok(machine),
            Authorization::Mismatch => Err(WaitronError::Unauthorized(hostname.to_string())),
            Authorization::NotBuilding => Err(WaitronError::NotBuilding(hostname.to_string())),
        }
    }

    /// Leave build mode after a successful install
    pub fn done_build_mode(&self, hostname: &str, token: &str) -> Result<Machine> {
        self.authorize(hostname, token)?;
        let machine = self
            .registry
            .remove(token)?
            .ok_or_else(|| WaitronError::NotBuilding(hostname.to_string()))?;

        info!(hostname = %hostname, "Build completed");
        Ok(machine)
    }

    /// Abort a build and run the post hooks.
    ///
    /// The machine leaves build mode before the hooks run; a hook failure is
    /// reported but does not undo the cancellation.
    pub async fn cancel_build_mode(&self, hostname: &str, token: &str) -> Result<Machine> {
        self.authorize(hostname, token)?;
        let machine = self
            .registry
            .remove(token)?
            .ok_or_else(|| WaitronError::NotBuilding(hostname.to_string()))?;

        info!(hostname = %hostname, "Build cancelled");

        self.hooks
            .run(HookPhase::Post, &machine)
            .await
            .map_err(|source| WaitronError::HookAfterCancel {
                hostname: hostname.to_string(),
                source,
            })?;

        Ok(machine)
    }

    /// Move a build forward; never backwards
    pub fn advance(&self, token: &str, status: BuildStatus) -> Result<()> {
        self.registry.advance_status(token, status)?;
        Ok(())
    }

    /// Status of a building machine. Unknown or not yet started is an error.
    pub fn status(&self, hostname: &str) -> Result<BuildStatus> {
        match self.registry.lookup_by_hostname(hostname)? {
            Some(machine) if machine.status != BuildStatus::Unset => Ok(machine.status),
            _ => Err(WaitronError::UnknownState(hostname.to_string())),
        }
    }

    pub fn statuses(&self) -> Result<BTreeMap<String, BuildStatus>> {
        Ok(self.registry.statuses()?)
    }
}
