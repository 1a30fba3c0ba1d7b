//! Shared models for Waitron
//!
//! - [`MachineDefinition`] / [`VmDefinition`]: immutable manifests resolved by
//!   a definition source
//! - [`Machine`]: the runtime build entity tracked while a host is in build mode

pub mod definition;
pub mod machine;

pub use definition::*;
pub use machine::*;
