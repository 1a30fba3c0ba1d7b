//! In-memory registry of machines in build mode
//!
//! Machines live in one arena keyed by [`MachineId`]. The hostname, MAC and
//! token maps hold ids only and are updated together under a single lock, so
//! no reader can observe one index without the others.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use waitron_common::{BuildStatus, Machine, normalize_mac};

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry lock poisoned")]
    Poisoned,

    #[error("MAC address {mac} already belongs to {hostname}")]
    MacInUse { mac: String, hostname: String },

    #[error("registry index out of sync: {0}")]
    Inconsistent(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Stable arena key for a registered machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MachineId(u64);

/// Outcome of a registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub token: String,
    /// The build this registration replaced, if the hostname was already building
    pub replaced: Option<Machine>,
}

/// Outcome of checking a token against a hostname
#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Granted(Machine),
    /// The hostname is building but under a different token
    Mismatch,
    NotBuilding,
}

#[derive(Default)]
struct Indices {
    next_id: u64,
    machines: HashMap<MachineId, Machine>,
    by_hostname: HashMap<String, MachineId>,
    by_mac: HashMap<String, MachineId>,
    by_token: HashMap<String, MachineId>,
}

impl Indices {
    fn get_by_token(&self, token: &str) -> Option<(MachineId, &Machine)> {
        let id = *self.by_token.get(token)?;
        self.machines.get(&id).map(|m| (id, m))
    }

    /// Drop a machine from the arena and every index that points at it
    fn evict(&mut self, id: MachineId) -> Result<Machine> {
        let machine = self
            .machines
            .remove(&id)
            .ok_or_else(|| RegistryError::Inconsistent(format!("no arena entry for {:?}", id)))?;

        self.by_token.remove(&machine.token);
        if self.by_hostname.get(machine.hostname()) == Some(&id) {
            self.by_hostname.remove(machine.hostname());
        }
        for mac in machine.macs() {
            if self.by_mac.get(&mac) == Some(&id) {
                self.by_mac.remove(&mac);
            }
        }
        Ok(machine)
    }
}

/// Registry of active builds
///
/// One coarse mutex guards all three indices. Callers get clones, never
/// references into the arena.
#[derive(Default)]
pub struct StateRegistry {
    inner: Mutex<Indices>,
}

impl StateRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Indices>> {
        self.inner.lock().map_err(|_| RegistryError::Poisoned)
    }

    /// Put a machine in build mode under a freshly generated token.
    ///
    /// A machine already building under the same hostname is replaced and its
    /// token stops resolving. A MAC held by a different hostname is rejected.
    pub fn register(&self, mut machine: Machine) -> Result<Registration> {
        let macs = machine.macs();
        let mut guard = self.lock()?;
        let indices = &mut *guard;

        let previous = indices.by_hostname.get(machine.hostname()).copied();

        for mac in &macs {
            if let Some(owner) = indices.by_mac.get(mac) {
                if Some(*owner) != previous {
                    let hostname = indices
                        .machines
                        .get(owner)
                        .map(|m| m.hostname().to_string())
                        .unwrap_or_default();
                    return Err(RegistryError::MacInUse {
                        mac: mac.clone(),
                        hostname,
                    });
                }
            }
        }

        let replaced = match previous {
            Some(id) => Some(indices.evict(id)?),
            None => None,
        };

        let token = loop {
            let candidate = Uuid::new_v4().to_string();
            if !indices.by_token.contains_key(&candidate) {
                break candidate;
            }
        };

        let id = MachineId(indices.next_id);
        indices.next_id += 1;

        machine.token = token.clone();
        indices.by_hostname.insert(machine.hostname().to_string(), id);
        for mac in macs {
            indices.by_mac.insert(mac, id);
        }
        indices.by_token.insert(token.clone(), id);
        indices.machines.insert(id, machine);

        if let Some(ref old) = replaced {
            debug!(hostname = %old.hostname(), "Evicted previous build");
        }
        debug!(?id, "Registered build");

        Ok(Registration { token, replaced })
    }

    pub fn lookup_by_token(&self, token: &str) -> Result<Option<Machine>> {
        let guard = self.lock()?;
        Ok(guard.get_by_token(token).map(|(_, m)| m.clone()))
    }

    pub fn lookup_by_hostname(&self, hostname: &str) -> Result<Option<Machine>> {
        let guard = self.lock()?;
        Ok(guard
            .by_hostname
            .get(hostname)
            .and_then(|id| guard.machines.get(id))
            .cloned())
    }

    pub fn lookup_by_mac(&self, mac: &str) -> Result<Option<Machine>> {
        let normalized = normalize_mac(mac);
        let guard = self.lock()?;
        Ok(guard
            .by_mac
            .get(&normalized)
            .and_then(|id| guard.machines.get(id))
            .cloned())
    }

    /// Check `token` against the build registered for `hostname`
    pub fn authorize(&self, hostname: &str, token: &str) -> Result<Authorization> {
        let guard = self.lock()?;

        let Some(machine) = guard
            .by_hostname
            .get(hostname)
            .and_then(|id| guard.machines.get(id))
        else {
            return Ok(Authorization::NotBuilding);
        };

        if machine.token != token {
            return Ok(Authorization::Mismatch);
        }

        match guard.get_by_token(token) {
            Some((_, m)) if m.hostname() == hostname => Ok(Authorization::Granted(m.clone())),
            _ => Err(RegistryError::Inconsistent(format!(
                "token index does not resolve to {}",
                hostname
            ))),
        }
    }

    /// Move a build forward to `status`. Never moves a build backwards.
    ///
    /// Returns the machine as stored after the call, or `None` if the token
    /// is not registered.
    pub fn advance_status(&self, token: &str, status: BuildStatus) -> Result<Option<Machine>> {
        let mut guard = self.lock()?;
        let Some(id) = guard.by_token.get(token).copied() else {
            return Ok(None);
        };
        let machine = guard
            .machines
            .get_mut(&id)
            .ok_or_else(|| RegistryError::Inconsistent(format!("no arena entry for {:?}", id)))?;

        if status > machine.status {
            debug!(
                hostname = %machine.hostname(),
                from = %machine.status,
                to = %status,
                "Build status advanced"
            );
            machine.status = status;
        }
        Ok(Some(machine.clone()))
    }

    /// Take a build out of the registry. `None` if the token does not resolve.
    pub fn remove(&self, token: &str) -> Result<Option<Machine>> {
        let mut guard = self.lock()?;
        let Some(id) = guard.by_token.get(token).copied() else {
            return Ok(None);
        };
        guard.evict(id).map(Some)
    }

    /// Snapshot of hostname -> status for every active build
    pub fn statuses(&self) -> Result<BTreeMap<String, BuildStatus>> {
        let guard = self.lock()?;
        Ok(guard
            .machines
            .values()
            .map(|m| (m.hostname().to_string(), m.status))
            .collect())
    }

    /// Snapshot of every build that has run at least its threshold at `now`
    pub fn stale_builds(&self, now: DateTime<Utc>) -> Result<Vec<Machine>> {
        let guard = self.lock()?;
        Ok(guard
            .machines
            .values()
            .filter(|m| m.is_stale(now))
            .cloned()
            .collect())
    }

    /// Tokens of every active build
    pub fn tokens(&self) -> Result<Vec<String>> {
        let guard = self.lock()?;
        Ok(guard.by_token.keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.machines.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
