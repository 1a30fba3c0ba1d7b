//! Rendering of preseed, finish and cloud-init templates
//!
//! Templates are MiniJinja with strict undefined behaviour. The context is
//! the build itself (definition fields at the top level, plus `token`,
//! `status` and `rescue`) and `base_url`.

use minijinja::{Environment, UndefinedBehavior, Value, context};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use waitron_common::{BuildStatus, Machine};

use crate::error::{Result, WaitronError};
use crate::hooks::{HookExecutor, HookPhase};

/// Which provisioning artifact a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Preseed,
    Finish,
    CloudInit,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Preseed => "preseed",
            TemplateKind::Finish => "finish",
            TemplateKind::CloudInit => "cloud-init",
        }
    }

    /// Status a build reaches once this artifact has been served
    pub fn reached_status(&self) -> Option<BuildStatus> {
        match self {
            TemplateKind::Preseed => Some(BuildStatus::Installing),
            TemplateKind::Finish => Some(BuildStatus::Installed),
            TemplateKind::CloudInit => None,
        }
    }
}

impl FromStr for TemplateKind {
    type Err = WaitronError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preseed" => Ok(TemplateKind::Preseed),
            "finish" => Ok(TemplateKind::Finish),
            "cloud-init" => Ok(TemplateKind::CloudInit),
            other => Err(WaitronError::UnknownTemplate(other.to_string())),
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render `source` against a build
pub(crate) fn render_for_machine(
    source: &str,
    machine: &Machine,
    base_url: &str,
) -> std::result::Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let ctx = context! {
        base_url => base_url,
        ..Value::from_serialize(machine)
    };
    env.render_str(source, ctx)
}

#[derive(Debug, Clone)]
pub struct TemplateDispatcher {
    template_path: PathBuf,
    machine_path: PathBuf,
    base_url: String,
    hooks: HookExecutor,
}

impl TemplateDispatcher {
    pub fn new(
        template_path: impl Into<PathBuf>,
        machine_path: impl Into<PathBuf>,
        base_url: impl Into<String>,
        hooks: HookExecutor,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            machine_path: machine_path.into(),
            base_url: base_url.into(),
            hooks,
        }
    }

    fn source_path(&self, kind: TemplateKind, machine: &Machine) -> PathBuf {
        let def = &machine.definition;
        match kind {
            TemplateKind::Preseed => self.template_path.join(&def.preseed),
            TemplateKind::Finish => self.template_path.join(&def.finish),
            TemplateKind::CloudInit => self
                .machine_path
                .join(format!("{}.cloud-init", machine.hostname())),
        }
    }

    /// Render an artifact for an authorized build.
    ///
    /// Preseed runs the pre hooks first and renders nothing if one fails.
    pub async fn render(&self, kind: TemplateKind, machine: &Machine) -> Result<String> {
        if kind == TemplateKind::Preseed {
            self.hooks.run(HookPhase::Pre, machine).await?;
        }

        let path = self.source_path(kind, machine);
        let source = read_template(&path, kind).await?;

        debug!(template = %path.display(), hostname = %machine.hostname(), "Rendering template");
        render_for_machine(&source, machine, &self.base_url)
            .map_err(|e| WaitronError::Render(format!("{}: {}", path.display(), e)))
    }
}

async fn read_template(path: &Path, kind: TemplateKind) -> Result<String> {
    let is_dir = tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false);
    if is_dir {
        return Err(WaitronError::Render(format!(
            "no {} template configured ({} is a directory)",
            kind,
            path.display()
        )));
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| WaitronError::Render(format!("{}: {}", path.display(), e)))
}
