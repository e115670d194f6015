//! Common types for the support archive operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod events;
pub mod id;
pub mod retry;
pub mod telemetry;

pub use config::OperatorConfig;
pub use domain::{CollectorDomain, Timeframe};
pub use error::Error;
pub use id::ArchiveId;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side write made by the operator
pub const FIELD_MANAGER: &str = "archivist-controller";

/// Finalizer that keeps a SupportArchive around until its files are removed
pub const CLEANUP_FINALIZER: &str = "archivist.dev/cleanup";

/// Default namespace the operator watches when none is configured
pub const DEFAULT_NAMESPACE: &str = "archivist-system";
