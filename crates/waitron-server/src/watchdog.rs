//! Stale build detection and recovery
//!
//! A periodic sweep picks builds that have run past their threshold and runs
//! each one's recovery commands on the shared task tracker. Every build is
//! recovered at most once.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use waitron_common::Machine;

use crate::hooks::machine_env;
use crate::registry::StateRegistry;
use crate::templates::render_for_machine;

pub struct StaleBuildWatchdog {
    registry: Arc<StateRegistry>,
    tasks: TaskTracker,
    base_url: String,
    interval: Duration,
    recovered: Mutex<HashSet<String>>,
    sweeping: AtomicBool,
}

/// Clears the in-progress flag when a sweep ends, however it ends
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl StaleBuildWatchdog {
    pub fn new(
        registry: Arc<StateRegistry>,
        tasks: TaskTracker,
        base_url: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            tasks,
            base_url: base_url.into(),
            interval,
            recovered: Mutex::new(HashSet::new()),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Dispatch recovery for every build that went stale and has not been
    /// recovered yet. Returns how many recoveries were started.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            debug!("Previous stale build sweep still running, skipping");
            return 0;
        }
        let _guard = SweepGuard(&self.sweeping);

        let (candidates, live) = match (self.registry.stale_builds(now), self.registry.tokens()) {
            (Ok(candidates), Ok(live)) => (candidates, live),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to read registry during stale build sweep: {}", e);
                return 0;
            }
        };

        let fresh: Vec<Machine> = {
            let Ok(mut recovered) = self.recovered.lock() else {
                error!("Recovered build set poisoned, skipping sweep");
                return 0;
            };
            let live: HashSet<String> = live.into_iter().collect();
            recovered.retain(|token| live.contains(token));

            candidates
                .into_iter()
                .filter(|m| recovered.insert(m.token.clone()))
                .collect()
        };

        let mut dispatched = 0;
        for machine in fresh {
            if machine.stale_build_commands.is_empty() {
                warn!(
                    hostname = %machine.hostname(),
                    elapsed_secs = machine.elapsed_secs(now),
                    "Build is stale but has no recovery commands"
                );
                continue;
            }

            info!(
                hostname = %machine.hostname(),
                elapsed_secs = machine.elapsed_secs(now),
                threshold_secs = machine.stale_build_threshold_secs,
                "Stale build detected, running recovery commands"
            );
            let base_url = self.base_url.clone();
            self.tasks.spawn(async move { run_recovery(&machine, &base_url).await });
            dispatched += 1;
        }
        dispatched
    }

    /// Start the periodic sweep; it stops when `shutdown_rx` changes
    pub fn start(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let dispatched = self.sweep(Utc::now());
                        debug!(dispatched, "Stale build sweep finished");
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Shutdown signal received, stopping stale build watchdog.");
                        break;
                    }
                }
            }
        })
    }
}

/// Run a build's recovery commands in order, stopping at the first failure
async fn run_recovery(machine: &Machine, base_url: &str) {
    for template in &machine.stale_build_commands {
        let command = match render_for_machine(template, machine, base_url) {
            Ok(command) => command,
            Err(e) => {
                error!(hostname = %machine.hostname(), "Failed to render recovery command: {}", e);
                return;
            }
        };

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .envs(machine_env(machine))
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                info!(
                    hostname = %machine.hostname(),
                    command = %command,
                    "Recovery command succeeded"
                );
            }
            Ok(output) => {
                error!(
                    hostname = %machine.hostname(),
                    command = %command,
                    code = output.status.code().unwrap_or(-1),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Recovery command failed"
                );
                return;
            }
            Err(e) => {
                error!(
                    hostname = %machine.hostname(),
                    command = %command,
                    "Failed to run recovery command: {}",
                    e
                );
                return;
            }
        }
    }
}
