//! Configuration record, version ordering, and release catalog types for pfsense-saml2.
//!
//! This crate defines the schema layer: the SAML2 package configuration record
//! (`Saml2Config`) with its field-level validation, release version parsing and
//! ordering (`PkgVersion`), and the release catalog entries (`Release`) together
//! with the host platform constraints they carry (`PlatformConstraint`).

pub mod config;
pub mod release;
pub mod version;

pub use config::{encode_blob, ConfigError, Saml2Config};
pub use release::{sort_catalog, PlatformConstraint, Release};
pub use version::{compare_versions, latest, PkgVersion, VersionError};
