//! Request-level errors and their HTTP mapping
//!
//! Callers get a terse message; the full error is logged here.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info};

use crate::api::BuildResult;
use crate::definitions::DefinitionError;
use crate::hooks::HookError;
use crate::registry::RegistryError;
use waitron_pixie::PixieError;

#[derive(Debug, thiserror::Error)]
pub enum WaitronError {
    #[error("invalid token for {0}")]
    Unauthorized(String),

    #[error("{0} is not in build mode")]
    NotBuilding(String),

    #[error("no definition found for {0}")]
    DefinitionNotFound(String),

    #[error("invalid definition for {hostname}: {reason}")]
    InvalidDefinition { hostname: String, reason: String },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("hook execution failed: {0}")]
    Hook(#[from] HookError),

    #[error("{hostname} was cancelled but post hooks failed: {source}")]
    HookAfterCancel {
        hostname: String,
        #[source]
        source: HookError,
    },

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("unknown template kind: {0}")]
    UnknownTemplate(String),

    #[error("unknown build state for {0}")]
    UnknownState(String),
}

pub type Result<T> = std::result::Result<T, WaitronError>;

impl From<DefinitionError> for WaitronError {
    fn from(err: DefinitionError) -> Self {
        match err {
            DefinitionError::NotFound(hostname) => WaitronError::DefinitionNotFound(hostname),
            other => WaitronError::Manifest(other.to_string()),
        }
    }
}

impl From<PixieError> for WaitronError {
    fn from(err: PixieError) -> Self {
        WaitronError::Render(err.to_string())
    }
}

impl WaitronError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WaitronError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WaitronError::NotBuilding(_) | WaitronError::UnknownTemplate(_) => {
                StatusCode::BAD_REQUEST
            }
            WaitronError::DefinitionNotFound(_) => StatusCode::NOT_FOUND,
            WaitronError::InvalidDefinition { .. }
            | WaitronError::Manifest(_)
            | WaitronError::Hook(_)
            | WaitronError::HookAfterCancel { .. }
            | WaitronError::Render(_)
            | WaitronError::Registry(_)
            | WaitronError::UnknownState(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the caller
    pub fn public_message(&self) -> String {
        match self {
            WaitronError::Unauthorized(_) => "Invalid Token".to_string(),
            WaitronError::NotBuilding(_) => {
                "Not in build mode or definition does not exist".to_string()
            }
            WaitronError::DefinitionNotFound(hostname) => {
                format!("Unable to find host definition for {}", hostname)
            }
            WaitronError::InvalidDefinition { hostname, .. } => {
                format!("Failed to set build mode on {}", hostname)
            }
            WaitronError::Manifest(_) => "Unable to read host definitions".to_string(),
            WaitronError::Hook(_) => "Cannot execute hooks".to_string(),
            WaitronError::HookAfterCancel { .. } => {
                "Build cancelled but post hooks failed".to_string()
            }
            WaitronError::Render(_) => "Unable to render template".to_string(),
            WaitronError::Registry(_) => "Internal registry error".to_string(),
            WaitronError::UnknownTemplate(kind) => format!("Unknown template {}", kind),
            WaitronError::UnknownState(_) => "Unknown state".to_string(),
        }
    }
}

impl IntoResponse for WaitronError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            info!(error = %self, "Request rejected");
        }
        (status, Json(BuildResult::error(self.public_message()))).into_response()
    }
}
