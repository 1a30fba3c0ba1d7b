//! Waitron server
//!
//! Puts machines into build mode, serves them their boot descriptor and
//! installer templates, and takes them out of build mode again when the
//! installer reports back.
//!
//! ```text
//! PUT  /build/web01            -> {"State":"OK","Token":T}
//! GET  /v1/boot/<mac>          -> {"kernel":..,"initrd":[..],"cmdline":..}
//! GET  /template/preseed/web01/T
//! GET  /template/finish/web01/T
//! GET  /done/web01/T           -> {"State":"OK"}
//! ```

pub mod api;
pub mod boot;
pub mod config;
pub mod definitions;
pub mod error;
pub mod hooks;
pub mod lifecycle;
pub mod registry;
pub mod templates;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::Context;
use axum::{Router, extract::MatchedPath, http::Request};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::task::TaskTracker;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};
use waitron_pixie::DescriptorGenerator;

pub use config::Config;
pub use error::WaitronError;

use boot::BootDescriptorProvider;
use definitions::DefinitionSource;
use hooks::HookExecutor;
use lifecycle::LifecycleController;
use registry::StateRegistry;
use templates::TemplateDispatcher;
use watchdog::StaleBuildWatchdog;

const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<StateRegistry>,
    pub definitions: Arc<dyn DefinitionSource>,
    pub lifecycle: LifecycleController,
    pub templates: TemplateDispatcher,
    pub boot: BootDescriptorProvider,
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(config: Config, definitions: Arc<dyn DefinitionSource>) -> Self {
        let registry = Arc::new(StateRegistry::new());
        let tasks = TaskTracker::new();
        let generator = Arc::new(DescriptorGenerator::new(config.pixie_config()));
        let hooks = HookExecutor::new(config.hooks_path.clone(), tasks.clone());

        let lifecycle = LifecycleController::new(
            registry.clone(),
            definitions.clone(),
            hooks.clone(),
            generator.clone(),
            config.default_stale_policy(),
        );
        let templates = TemplateDispatcher::new(
            config.template_path.clone(),
            config.machine_path.clone(),
            config.base_url.clone(),
            hooks,
        );
        let boot = BootDescriptorProvider::new(registry.clone(), generator);

        Self {
            config: Arc::new(config),
            registry,
            definitions,
            lifecycle,
            templates,
            boot,
            tasks,
        }
    }

    pub fn watchdog(&self) -> StaleBuildWatchdog {
        StaleBuildWatchdog::new(
            self.registry.clone(),
            self.tasks.clone(),
            self.config.base_url.clone(),
            self.config.stale_build_check_interval(),
        )
    }
}

/// The full application: API routes, static files and request tracing
pub fn router(state: AppState) -> Router {
    let mut app = api::api_router();
    if let Some(ref statics) = state.config.statics_path {
        app = app.nest_service("/files", ServeDir::new(statics));
    }

    app.layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<axum::body::Body>| {
                let matched_path = request
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or(request.uri().path());

                tracing::debug_span!(
                    "http-request",
                    method = %request.method(),
                    uri = %request.uri(),
                    matched_path = matched_path,
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
    .with_state(state)
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Sending shutdown signal to all components");
    let _ = shutdown_tx.send(true);
}

/// Serve until Ctrl+C or SIGTERM, then drain hooks and recoveries
pub async fn run(config: Config, addr: SocketAddr) -> anyhow::Result<()> {
    let definitions: Arc<dyn DefinitionSource> = Arc::new(config.definition_source());
    let state = AppState::new(config, definitions);
    let tasks = state.tasks.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watchdog = Arc::new(state.watchdog()).start(shutdown_rx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(
        "Waitron listening on http://{}",
        listener.local_addr().context("Failed to get local address")?
    );

    let served = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await;
    if let Err(ref e) = served {
        error!("Server error: {}", e);
        let _ = shutdown_tx.send(true);
    }

    if let Err(e) = watchdog.await {
        warn!("Stale build watchdog ended abnormally: {}", e);
    }
    drain(&tasks, SHUTDOWN_DRAIN_TIMEOUT).await;

    served.context("Server error")?;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for in-flight hooks and recovery commands, giving up after `timeout`
async fn drain(tasks: &TaskTracker, timeout: Duration) -> bool {
    tasks.close();
    let drained = tokio::time::timeout(timeout, tasks.wait()).await.is_ok();
    if !drained {
        warn!(
            remaining = tasks.len(),
            "Gave up waiting for hooks and recovery commands"
        );
    }
    drained
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_tracked_tasks() {
        let tasks = TaskTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        assert!(drain(&tasks, Duration::from_secs(5)).await);
        assert!(tasks.is_closed());
        assert!(rx.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_timeout() {
        let tasks = TaskTracker::new();
        tasks.spawn(std::future::pending::<()>());

        assert!(!drain(&tasks, Duration::from_secs(10)).await);
        assert_eq!(tasks.len(), 1);
    }
}
