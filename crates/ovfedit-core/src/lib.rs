//! ovfedit core library.
//!
//! This crate edits Open Virtualization Format (OVF) virtual appliance
//! packages: plain descriptor-plus-files directories and single-file OVA
//! TAR archives. Packages are loaded, edited semantically in memory, and
//! written back out with a regenerated manifest, preserving everything the
//! editor was not asked to change - unknown XML rides along byte-for-byte.
//!
//! # Modules
//!
//! - `error` - Error types and Result alias
//! - `session` - Per-invocation state: confirmation, cancellation, scratch
//! - `xml` - Namespace-aware XML tree with byte-faithful round-tripping
//! - `names` - OVF namespaces, element names, and resource-type codes
//! - `checksum` / `manifest` - digest plumbing and `.mf` handling
//! - `package` - OVF directory / OVA TAR container handling
//! - `ovf` - the descriptor model and typed section accessors
//! - `hardware` - the profile-aware hardware factorization engine
//! - `platform` - product-class-specific defaults and bounds
//! - `helpers` - external helper-tool capability interface
//! - `ops` - high-level edit operations invoked by clients

pub mod checksum;
pub mod error;
pub mod hardware;
pub mod helpers;
pub mod manifest;
pub mod names;
pub mod ops;
pub mod ovf;
pub mod package;
pub mod platform;
pub mod session;
pub mod validation;
pub mod xml;

pub use error::{Error, Result};
pub use names::{OvfVersion, ResourceKind};
pub use ops::open_package;
pub use ovf::Ovf;
pub use package::{Package, PackageForm};
pub use session::{CancelToken, ConfirmCallback, Session};
