//! Custom Resource Definitions for the support archive operator

mod support_archive;
mod types;

pub use support_archive::{
    ArchivePhase, ContentTimeframe, ExcludedContents, SupportArchive, SupportArchiveSpec,
    SupportArchiveStatus,
};
pub use types::{set_condition, Condition, ConditionStatus};
