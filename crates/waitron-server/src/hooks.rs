//! Pre/post hook execution
//!
//! Hooks are executables in `<hooks_path>/pre-hook/` and
//! `<hooks_path>/post-hook/`. They run one after another in file-name order,
//! each as `<hook> <hostname>` with the build described in `WAITRON_*`
//! environment variables. The first failure stops the run.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use waitron_common::Machine;

/// Error type for hook runs
#[derive(Debug, Error)]
pub enum HookError {
    /// Hook exited non-zero
    #[error("hook {hook} exited with code {code}: {stderr}")]
    Failed {
        hook: String,
        code: i32,
        stderr: String,
    },

    /// Hook could not be started
    #[error("failed to start hook {hook}: {source}")]
    Spawn {
        hook: String,
        #[source]
        source: std::io::Error,
    },

    /// Hook directory could not be read
    #[error("failed to read hook directory {path}: {source}")]
    Discovery {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The background task running the hooks died
    #[error("hook task aborted: {0}")]
    Aborted(String),
}

/// When a hook runs relative to the lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Before the preseed is rendered
    Pre,
    /// After a build is cancelled
    Post,
}

impl HookPhase {
    pub const ALL: [HookPhase; 2] = [HookPhase::Pre, HookPhase::Post];

    pub fn dir_name(&self) -> &'static str {
        match self {
            HookPhase::Pre => "pre-hook",
            HookPhase::Post => "post-hook",
        }
    }
}

/// Environment handed to hooks and recovery commands
pub(crate) fn machine_env(machine: &Machine) -> Vec<(&'static str, String)> {
    let def = &machine.definition;
    vec![
        ("WAITRON_HOSTNAME", def.hostname.clone()),
        ("WAITRON_DOMAIN", def.domain.clone()),
        ("WAITRON_TOKEN", machine.token.clone()),
        ("WAITRON_OS", def.operating_system.clone()),
        ("WAITRON_RESCUE", machine.rescue.to_string()),
        ("WAITRON_MACS", machine.macs().join(",")),
        ("WAITRON_ROLES", def.roles.join(",")),
    ]
}

/// Runs hook scripts on the shared task tracker
#[derive(Debug, Clone)]
pub struct HookExecutor {
    hooks_path: Option<PathBuf>,
    tasks: TaskTracker,
}

impl HookExecutor {
    pub fn new(hooks_path: Option<PathBuf>, tasks: TaskTracker) -> Self {
        Self { hooks_path, tasks }
    }

    /// Hooks for a phase in execution order. No directory means no hooks.
    pub async fn discover(&self, phase: HookPhase) -> Result<Vec<PathBuf>, HookError> {
        let Some(ref root) = self.hooks_path else {
            return Ok(Vec::new());
        };
        discover_in(&root.join(phase.dir_name())).await
    }

    pub async fn list(&self) -> Result<Vec<String>, HookError> {
        list_hooks(self.hooks_path.as_deref()).await
    }

    /// Run every hook for `phase` against `machine`, stopping at the first failure.
    ///
    /// Returns the number of hooks that ran.
    pub async fn run(&self, phase: HookPhase, machine: &Machine) -> Result<usize, HookError> {
        let hooks = self.discover(phase).await?;
        if hooks.is_empty() {
            return Ok(0);
        }

        let machine = machine.clone();
        let handle = self.tasks.spawn(async move {
            for hook in &hooks {
                run_hook(hook, phase, &machine).await?;
            }
            Ok(hooks.len())
        });

        handle
            .await
            .map_err(|e| HookError::Aborted(e.to_string()))?
    }
}

/// Every hook under `hooks_path` as `<phase-dir>/<file>`, pre hooks first
pub async fn list_hooks(hooks_path: Option<&Path>) -> Result<Vec<String>, HookError> {
    let Some(root) = hooks_path else {
        return Ok(Vec::new());
    };
    let mut names = Vec::new();
    for phase in HookPhase::ALL {
        for path in discover_in(&root.join(phase.dir_name())).await? {
            if let Some(file) = path.file_name().and_then(|f| f.to_str()) {
                names.push(format!("{}/{}", phase.dir_name(), file));
            }
        }
    }
    Ok(names)
}

async fn discover_in(dir: &Path) -> Result<Vec<PathBuf>, HookError> {
    let discovery_err = |source| HookError::Discovery {
        path: dir.display().to_string(),
        source,
    };

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(discovery_err(e)),
    };

    let mut hooks = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(discovery_err)? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        // Follows symlinks
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => hooks.push(path),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(hook = %path.display(), "Skipping dangling hook symlink");
            }
            Err(e) => return Err(discovery_err(e)),
        }
    }
    hooks.sort();
    Ok(hooks)
}

async fn run_hook(hook: &Path, phase: HookPhase, machine: &Machine) -> Result<(), HookError> {
    let name = hook.display().to_string();
    debug!(hook = %name, hostname = %machine.hostname(), "Running hook");

    let output = Command::new(hook)
        .arg(machine.hostname())
        .envs(machine_env(machine))
        .env("WAITRON_PHASE", phase.dir_name())
        .output()
        .await
        .map_err(|source| HookError::Spawn {
            hook: name.clone(),
            source,
        })?;

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(hook = %name, code = code, stderr = %stderr, "Hook failed");
        return Err(HookError::Failed {
            hook: name,
            code,
            stderr,
        });
    }

    info!(hook = %name, hostname = %machine.hostname(), "Hook completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_script;
    use waitron_common::{MachineDefinition, StaleBuildPolicy};

    fn test_machine() -> Machine {
        let def = MachineDefinition {
            hostname: "web01".to_string(),
            domain: "example.com".to_string(),
            roles: vec!["web".to_string(), "edge".to_string()],
            ..Default::default()
        };
        let mut m = Machine::new(def, StaleBuildPolicy::default(), false);
        m.token = "tok".to_string();
        m
    }

    #[tokio::test]
    async fn test_missing_hooks_dir_means_no_hooks() {
        let executor = HookExecutor::new(None, TaskTracker::new());
        assert_eq!(executor.run(HookPhase::Pre, &test_machine()).await.unwrap(), 0);

        let tmp = tempfile::tempdir().unwrap();
        let executor = HookExecutor::new(Some(tmp.path().to_path_buf()), TaskTracker::new());
        assert!(executor.list().await.unwrap().is_empty());
        assert_eq!(executor.run(HookPhase::Post, &test_machine()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_hooks_run_in_lexical_order_with_context() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log");
        let pre = tmp.path().join("pre-hook");
        let second = format!("echo \"second $1 $WAITRON_PHASE\" >> {}", log.display());
        let first = format!("echo \"first $WAITRON_TOKEN $WAITRON_ROLES\" >> {}", log.display());
        write_script(&pre, "20-second", &second);
        write_script(&pre, "10-first", &first);
        write_script(&pre, ".hidden", "exit 1");

        let executor = HookExecutor::new(Some(tmp.path().to_path_buf()), TaskTracker::new());
        assert_eq!(executor.run(HookPhase::Pre, &test_machine()).await.unwrap(), 2);

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "first tok web,edge\nsecond web01 pre-hook\n");
    }

    #[tokio::test]
    async fn test_first_failure_stops_remaining_hooks() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("ran");
        let post = tmp.path().join("post-hook");
        write_script(&post, "10-fail", "echo boom >&2; exit 3");
        write_script(&post, "20-never", &format!("touch {}", marker.display()));

        let executor = HookExecutor::new(Some(tmp.path().to_path_buf()), TaskTracker::new());
        let err = executor.run(HookPhase::Post, &test_machine()).await.unwrap_err();

        match err {
            HookError::Failed { code, stderr, hook } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
                assert!(hook.ends_with("10-fail"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_list_hooks() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(&tmp.path().join("post-hook"), "50-dns", "true");
        write_script(&tmp.path().join("pre-hook"), "10-ipam", "true");

        let executor = HookExecutor::new(Some(tmp.path().to_path_buf()), TaskTracker::new());
        assert_eq!(
            executor.list().await.unwrap(),
            vec!["pre-hook/10-ipam".to_string(), "post-hook/50-dns".to_string()]
        );
    }

    #[tokio::test]
    async fn test_symlinked_hooks_run() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("log");
        let target = write_script(
            &tmp.path().join("shared"),
            "ipam",
            &format!("echo \"ipam $1\" >> {}", log.display()),
        );
        let pre = tmp.path().join("pre-hook");
        std::fs::create_dir_all(&pre).unwrap();
        std::os::unix::fs::symlink(&target, pre.join("10-ipam")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("missing"), pre.join("20-dangling")).unwrap();

        let executor = HookExecutor::new(Some(tmp.path().to_path_buf()), TaskTracker::new());
        assert_eq!(executor.list().await.unwrap(), vec!["pre-hook/10-ipam".to_string()]);
        assert_eq!(executor.run(HookPhase::Pre, &test_machine()).await.unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "ipam web01\n");
    }

    #[tokio::test]
    async fn test_hook_runs_are_tracked() {
        let tmp = tempfile::tempdir().unwrap();
        write_script(&tmp.path().join("pre-hook"), "10-ok", "true");

        let tasks = TaskTracker::new();
        let executor = HookExecutor::new(Some(tmp.path().to_path_buf()), tasks.clone());
        executor.run(HookPhase::Pre, &test_machine()).await.unwrap();

        tasks.close();
        tasks.wait().await;
        assert!(tasks.is_empty());
    }
}
