//! Error types for boot descriptor generation

use thiserror::Error;

/// Error type for descriptor operations
#[derive(Debug, Error)]
pub enum PixieError {
    /// A field needed to boot the machine is absent
    #[error("missing boot configuration: {0}")]
    MissingConfig(String),

    /// The command line template failed to render
    #[error("cmdline template error: {0}")]
    Template(#[from] minijinja::Error),
}

/// Result type for descriptor operations
pub type Result<T> = std::result::Result<T, PixieError>;
