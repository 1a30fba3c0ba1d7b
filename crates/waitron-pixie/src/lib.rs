//! Waitron boot descriptors
//!
//! This crate turns a machine in build mode into the `{kernel, initrd, cmdline}`
//! descriptor that pixiecore consumes in API mode.
//!
//! # Boot Modes
//!
//! - **Normal**: boot the installer image from the machine definition
//! - **Rescue**: boot the alternate rescue image instead
//!
//! # Example
//!
//! ```
//! use waitron_common::{BootImage, Machine, MachineDefinition, StaleBuildPolicy};
//! use waitron_pixie::{DescriptorGenerator, PixieConfig};
//!
//! let definition = MachineDefinition {
//!     hostname: "web01".to_string(),
//!     boot: BootImage {
//!         image_url: "http://mirror/installer/".to_string(),
//!         kernel: "linux".to_string(),
//!         initrd: vec!["initrd.gz".to_string()],
//!         cmdline: "hostname={{ hostname }}".to_string(),
//!     },
//!     ..Default::default()
//! };
//! let machine = Machine::new(definition, StaleBuildPolicy::default(), false);
//!
//! let generator = DescriptorGenerator::new(PixieConfig::new("http://waitron:9090"));
//! let descriptor = generator.generate(&machine).unwrap();
//!
//! assert_eq!(descriptor.kernel, "http://mirror/installer/linux");
//! assert_eq!(descriptor.cmdline, "hostname=web01");
//! ```

pub mod descriptor;
pub mod error;

pub use descriptor::*;
pub use error::*;
