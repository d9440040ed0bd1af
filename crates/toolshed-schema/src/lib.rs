//! Shared data model for toolshed.
//!
//! These types are read by every other crate in the workspace: registry
//! metadata ([`PackageInfo`]), requested and resolved packages ([`Package`]),
//! the platform matrix ([`Os`], [`Arch`], [`Platform`]) and checksum
//! primitives ([`ChecksumAlgorithm`], [`Digest`]).

pub mod arch;
pub mod hash;
pub mod package_info;
pub mod types;

// Re-exports
pub use arch::*;
pub use hash::*;
pub use package_info::*;
pub use types::*;

/// Registry name used when a manifest entry does not name one.
pub const DEFAULT_REGISTRY: &str = "standard";
